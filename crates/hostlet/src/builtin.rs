//! Guest classes implemented natively in this process.
//!
//! The binary serves these through [`NativeLoader`] so the protocol can be
//! driven end to end without an external guest runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::component::{ComponentHost, ComponentSpec};
use crate::guest::{GuestClass, GuestError, GuestInstance, GuestLoader};
use crate::lock::lock;
use crate::scripting::{GuestObject, GuestValue, Member, ScriptError, Scriptable, ValueType};

pub const ECHO_CLASS: &str = "hostlet.Echo";

type ClassFactory = Box<dyn Fn(&ComponentSpec) -> Box<dyn GuestClass> + Send + Sync>;

/// Loader resolving class names against an in-process table.
#[derive(Default)]
pub struct NativeLoader {
    classes: HashMap<String, ClassFactory>,
}

impl NativeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader with every built-in class registered.
    pub fn with_builtins() -> Self {
        let mut loader = Self::new();
        loader.register(ECHO_CLASS, |_| Box::new(EchoClass) as Box<dyn GuestClass>);
        loader
    }

    pub fn register(
        &mut self,
        class: impl Into<String>,
        factory: impl Fn(&ComponentSpec) -> Box<dyn GuestClass> + Send + Sync + 'static,
    ) {
        self.classes.insert(class.into(), Box::new(factory));
    }

    pub fn classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }
}

impl GuestLoader for NativeLoader {
    fn load(&self, spec: &ComponentSpec) -> Result<Box<dyn GuestClass>, GuestError> {
        let factory = self.classes.get(&spec.class_name).ok_or_else(|| {
            GuestError::load(spec.class_name.clone(), "no native class with that name")
        })?;
        Ok(factory(spec))
    }
}

struct EchoClass;

impl GuestClass for EchoClass {
    fn instantiate(&self, host: ComponentHost) -> Result<Box<dyn GuestInstance>, GuestError> {
        let message = host.parameter("message").unwrap_or_default().to_string();
        let object = Arc::new(EchoObject {
            host: host.clone(),
            state: Mutex::new(EchoState { message, count: 0 }),
        });
        Ok(Box::new(EchoInstance { host, object }))
    }
}

struct EchoInstance {
    host: ComponentHost,
    object: Arc<EchoObject>,
}

impl GuestInstance for EchoInstance {
    fn init(&mut self) -> Result<(), GuestError> {
        self.host.show_status("echo initialized");
        Ok(())
    }

    fn start(&mut self) -> Result<(), GuestError> {
        self.host.show_status("echo started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), GuestError> {
        self.host.show_status("echo stopped");
        Ok(())
    }

    fn scriptable(&self) -> Option<GuestObject> {
        Some(self.object.clone() as GuestObject)
    }
}

struct EchoState {
    message: String,
    count: i64,
}

/// Script surface: `message` and `count` fields, `echo(s)`, `increment()`
/// and `status(s)` methods.
struct EchoObject {
    host: ComponentHost,
    state: Mutex<EchoState>,
}

impl Scriptable for EchoObject {
    fn class_name(&self) -> &str {
        ECHO_CLASS
    }

    fn resolve_member(&self, name: &str) -> Member {
        match name {
            "message" => Member::Field(ValueType::Str),
            "count" => Member::Field(ValueType::Int),
            "echo" | "status" => Member::Method(vec![vec![ValueType::Str]]),
            "increment" => Member::Method(vec![vec![]]),
            _ => Member::NotFound,
        }
    }

    fn get_field(&self, name: &str) -> Result<GuestValue, ScriptError> {
        let state = lock(&self.state);
        match name {
            "message" => Ok(GuestValue::from(state.message.clone())),
            "count" => Ok(GuestValue::from(state.count)),
            _ => Err(ScriptError::MemberNotFound(name.to_string())),
        }
    }

    fn set_field(&self, name: &str, value: GuestValue) -> Result<(), ScriptError> {
        let mut state = lock(&self.state);
        match name {
            "message" => {
                state.message = value.as_str().unwrap_or_default().to_string();
            }
            "count" => {
                state.count = value
                    .as_i64()
                    .ok_or_else(|| ScriptError::guest("count must be an integer"))?;
            }
            _ => return Err(ScriptError::MemberNotFound(name.to_string())),
        }
        Ok(())
    }

    fn invoke(&self, name: &str, args: Vec<GuestValue>) -> Result<GuestValue, ScriptError> {
        let text = args.first().and_then(GuestValue::as_str).unwrap_or_default();
        match name {
            "echo" => {
                let state = lock(&self.state);
                Ok(GuestValue::from(format!("{}{text}", state.message)))
            }
            "increment" => {
                let mut state = lock(&self.state);
                state.count += 1;
                Ok(GuestValue::from(state.count))
            }
            "status" => {
                self.host.show_status(text);
                Ok(GuestValue::Null)
            }
            _ => Err(ScriptError::NoMatchingMethod {
                name: name.to_string(),
                arity: args.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::ComponentRequest;

    fn spec(class_name: &str) -> ComponentSpec {
        ComponentSpec::from_request(ComponentRequest {
            context_id: "c1".into(),
            component_id: "a1".into(),
            name: "echo".into(),
            class_name: class_name.into(),
            base_url: "http://example.org/".into(),
            user: String::new(),
            password: String::new(),
            auth_realm: String::new(),
            code_base: String::new(),
            archives: String::new(),
            width: "10".into(),
            height: "10".into(),
            title: String::new(),
            params: Vec::new(),
        })
    }

    #[test]
    fn builtins_are_listed() {
        assert_eq!(NativeLoader::with_builtins().classes(), vec![ECHO_CLASS]);
        assert!(NativeLoader::new().classes().is_empty());
    }

    #[test]
    fn unknown_class_fails_to_load() {
        let loader = NativeLoader::with_builtins();
        assert!(loader.load(&spec(ECHO_CLASS)).is_ok());
        match loader.load(&spec("hostlet.Missing")) {
            Err(GuestError::Load { class, .. }) => assert_eq!(class, "hostlet.Missing"),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("missing class loaded"),
        }
    }
}
