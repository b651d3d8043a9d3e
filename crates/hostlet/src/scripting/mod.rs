//! Scriptable object bridge.
//!
//! - **object**: the `Scriptable` capability interface guest objects implement
//! - **value**: guest values and string coercion
//! - **handles**: per-component handle table
//! - **actions**: controller-to-guest get/put/call
//! - **eval**: guest-to-controller evaluation with a single pending slot

pub mod actions;
pub mod eval;
pub mod handles;
pub mod object;
pub mod value;

pub use actions::{Action, ActionKind};
pub use eval::{EvalError, RETURN_SLOT, RemoteObject, ScriptBridge, ScriptValue, TicketCounter};
pub use handles::{ObjectHandle, ObjectHandleTable};
pub use object::{GuestObject, Member, ScriptError, Scriptable};
pub use value::{GuestValue, ValueType};

#[cfg(test)]
pub(crate) mod testing {
    //! A configurable scriptable object for tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{GuestValue, Member, ScriptError, Scriptable, ValueType};

    type MethodFn = Box<dyn Fn(Vec<GuestValue>) -> Result<GuestValue, ScriptError> + Send + Sync>;

    pub struct Bag {
        class: String,
        fields: Mutex<HashMap<String, (ValueType, GuestValue)>>,
        methods: Vec<(String, Vec<ValueType>, MethodFn)>,
    }

    impl Bag {
        pub fn new(class: &str) -> Self {
            Self {
                class: class.to_string(),
                fields: Mutex::new(HashMap::new()),
                methods: Vec::new(),
            }
        }

        pub fn with_field(self, name: &str, ty: ValueType, value: GuestValue) -> Self {
            self.fields
                .lock()
                .unwrap()
                .insert(name.to_string(), (ty, value));
            self
        }

        pub fn with_method(
            mut self,
            name: &str,
            params: Vec<ValueType>,
            f: impl Fn(Vec<GuestValue>) -> Result<GuestValue, ScriptError> + Send + Sync + 'static,
        ) -> Self {
            self.methods.push((name.to_string(), params, Box::new(f)));
            self
        }
    }

    impl Scriptable for Bag {
        fn class_name(&self) -> &str {
            &self.class
        }

        fn resolve_member(&self, name: &str) -> Member {
            if let Some((ty, _)) = self.fields.lock().unwrap().get(name) {
                return Member::Field(*ty);
            }
            let overloads: Vec<Vec<ValueType>> = self
                .methods
                .iter()
                .filter(|(n, _, _)| n == name)
                .map(|(_, params, _)| params.clone())
                .collect();
            if overloads.is_empty() {
                Member::NotFound
            } else {
                Member::Method(overloads)
            }
        }

        fn get_field(&self, name: &str) -> Result<GuestValue, ScriptError> {
            self.fields
                .lock()
                .unwrap()
                .get(name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| ScriptError::MemberNotFound(name.to_string()))
        }

        fn set_field(&self, name: &str, value: GuestValue) -> Result<(), ScriptError> {
            let mut fields = self.fields.lock().unwrap();
            let entry = fields
                .get_mut(name)
                .ok_or_else(|| ScriptError::MemberNotFound(name.to_string()))?;
            entry.1 = value;
            Ok(())
        }

        fn invoke(&self, name: &str, args: Vec<GuestValue>) -> Result<GuestValue, ScriptError> {
            let (_, _, f) = self
                .methods
                .iter()
                .find(|(n, params, _)| n == name && params.len() == args.len())
                .ok_or_else(|| ScriptError::NoMatchingMethod {
                    name: name.to_string(),
                    arity: args.len(),
                })?;
            f(args)
        }

        fn invoke_overload(
            &self,
            name: &str,
            overload: usize,
            args: Vec<GuestValue>,
        ) -> Result<GuestValue, ScriptError> {
            let (_, _, f) = self
                .methods
                .iter()
                .filter(|(n, _, _)| n == name)
                .nth(overload)
                .ok_or_else(|| ScriptError::NoMatchingMethod {
                    name: name.to_string(),
                    arity: args.len(),
                })?;
            f(args)
        }
    }
}
