//! The capability interface guest objects implement to be reachable from
//! script.

use std::sync::Arc;

use super::value::{GuestValue, ValueType};

/// Shared reference to a scriptable guest object.
pub type GuestObject = Arc<dyn Scriptable>;

/// What a member name resolves to on a guest object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    Field(ValueType),
    /// One entry per overload, each listing its parameter types.
    Method(Vec<Vec<ValueType>>),
    NotFound,
}

/// Bridge call failures. Each is answered with an `Error`-typed result.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("handle {0} not found")]
    HandleNotFound(u64),

    #[error("component has no scriptable object")]
    NotScriptable,

    #[error("no member named {0}")]
    MemberNotFound(String),

    #[error("no method {name} taking {arity} arguments")]
    NoMatchingMethod { name: String, arity: usize },

    #[error("cannot convert {value:?} to {expected}")]
    Coercion { value: String, expected: ValueType },

    #[error("field {0} is read-only")]
    ReadOnly(String),

    #[error("{0}")]
    Guest(String),
}

impl ScriptError {
    pub fn coercion(value: &str, expected: ValueType) -> Self {
        Self::Coercion {
            value: value.to_string(),
            expected,
        }
    }

    pub fn guest(message: impl Into<String>) -> Self {
        Self::Guest(message.into())
    }
}

/// A guest object whose fields and methods are visible to the controller's
/// script engine.
///
/// The bridge asks [`resolve_member`](Scriptable::resolve_member) first and
/// only then touches the field or method, so implementations can rely on the
/// name having resolved to the matching kind.
pub trait Scriptable: Send + Sync {
    fn class_name(&self) -> &str;

    fn resolve_member(&self, name: &str) -> Member;

    fn get_field(&self, name: &str) -> Result<GuestValue, ScriptError>;

    fn set_field(&self, name: &str, _value: GuestValue) -> Result<(), ScriptError> {
        Err(ScriptError::ReadOnly(name.to_string()))
    }

    fn invoke(&self, name: &str, args: Vec<GuestValue>) -> Result<GuestValue, ScriptError> {
        Err(ScriptError::NoMatchingMethod {
            name: name.to_string(),
            arity: args.len(),
        })
    }

    /// Invoke the overload at `overload` in the list returned by
    /// [`resolve_member`](Scriptable::resolve_member). `args` are already
    /// coerced to that overload's parameter types.
    fn invoke_overload(
        &self,
        name: &str,
        _overload: usize,
        args: Vec<GuestValue>,
    ) -> Result<GuestValue, ScriptError> {
        self.invoke(name, args)
    }

    /// Text the controller sees for an object-typed value.
    fn describe(&self) -> String {
        format!("[object {}]", self.class_name())
    }
}
