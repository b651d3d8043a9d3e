//! Controller-initiated member operations on guest objects.
//!
//! An [`Action`] is queued on the owning component's worker and applied
//! between lifecycle steps. Applying always produces a [`MemberReply`]
//! carrying the outcome; failures become `Error`-typed replies.

use super::handles::{ObjectHandle, ObjectHandleTable};
use super::object::{GuestObject, Member, ScriptError};
use super::value::{GuestValue, coerce, format_number};
use crate::bridge::protocol::{MemberOp, MemberReply, TypeCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Get { name: String },
    Put { name: String, value: String },
    Call { name: String, args: Vec<String> },
}

/// One queued member request from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub ticket: u64,
    pub handle: ObjectHandle,
    pub kind: ActionKind,
}

impl Action {
    pub fn op(&self) -> MemberOp {
        match self.kind {
            ActionKind::Get { .. } => MemberOp::Get,
            ActionKind::Put { .. } => MemberOp::Put,
            ActionKind::Call { .. } => MemberOp::Call,
        }
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            ActionKind::Get { name } | ActionKind::Put { name, .. } | ActionKind::Call { name, .. } => {
                name
            }
        }
    }

    /// Reply for an action that could not run at all.
    pub fn rejected(&self, reason: &str) -> MemberReply {
        MemberReply::error(self.handle.get(), reason)
    }

    /// Resolve the target and perform the operation.
    pub fn apply(&self, root: Option<&GuestObject>, table: &ObjectHandleTable) -> MemberReply {
        let result = resolve_target(self.handle, root, table).and_then(|target| match &self.kind {
            ActionKind::Get { name } => get_member(&target, name, self.handle, table),
            ActionKind::Put { name, value } => {
                put_member(&target, name, value).map(|()| MemberReply::void(self.handle.get()))
            }
            ActionKind::Call { name, args } => call_member(&target, name, args, self.handle, table),
        });

        result.unwrap_or_else(|e| {
            tracing::debug!(
                ticket = self.ticket,
                handle = %self.handle,
                member = self.name(),
                error = %e,
                "Member request failed"
            );
            MemberReply::error(self.handle.get(), e.to_string())
        })
    }
}

fn resolve_target(
    handle: ObjectHandle,
    root: Option<&GuestObject>,
    table: &ObjectHandleTable,
) -> Result<GuestObject, ScriptError> {
    if handle.is_component() {
        return root.cloned().ok_or(ScriptError::NotScriptable);
    }
    table
        .get(handle)
        .ok_or(ScriptError::HandleNotFound(handle.get()))
}

fn get_member(
    target: &GuestObject,
    name: &str,
    handle: ObjectHandle,
    table: &ObjectHandleTable,
) -> Result<MemberReply, ScriptError> {
    match target.resolve_member(name) {
        Member::Field(_) => {
            let value = target.get_field(name)?;
            Ok(typed_reply(value, handle, table))
        }
        Member::Method(_) => Ok(MemberReply::new(TypeCode::Function, handle.get(), "")),
        Member::NotFound => Err(ScriptError::MemberNotFound(name.to_string())),
    }
}

fn put_member(target: &GuestObject, name: &str, raw: &str) -> Result<(), ScriptError> {
    match target.resolve_member(name) {
        Member::Field(ty) => target.set_field(name, coerce(raw, ty)?),
        Member::Method(_) => Err(ScriptError::ReadOnly(name.to_string())),
        Member::NotFound => Err(ScriptError::MemberNotFound(name.to_string())),
    }
}

fn call_member(
    target: &GuestObject,
    name: &str,
    args: &[String],
    handle: ObjectHandle,
    table: &ObjectHandleTable,
) -> Result<MemberReply, ScriptError> {
    let Member::Method(overloads) = target.resolve_member(name) else {
        return Err(ScriptError::NoMatchingMethod {
            name: name.to_string(),
            arity: args.len(),
        });
    };
    // First overload of the right arity whose arguments all coerce wins.
    let mut coercion_error = None;
    for (index, params) in overloads.iter().enumerate() {
        if params.len() != args.len() {
            continue;
        }
        let coerced = args
            .iter()
            .zip(params)
            .map(|(raw, ty)| coerce(raw, *ty))
            .collect::<Result<Vec<_>, _>>();
        match coerced {
            Ok(values) => {
                let result = target.invoke_overload(name, index, values)?;
                return Ok(typed_reply(result, handle, table));
            }
            Err(e) => {
                coercion_error.get_or_insert(e);
            }
        }
    }
    Err(coercion_error.unwrap_or_else(|| ScriptError::NoMatchingMethod {
        name: name.to_string(),
        arity: args.len(),
    }))
}

/// Map a guest value to its wire form, minting a handle for objects.
///
/// Primitive results echo the handle the request targeted.
pub fn typed_reply(value: GuestValue, handle: ObjectHandle, table: &ObjectHandleTable) -> MemberReply {
    let echo = handle.get();
    match value {
        GuestValue::Null => MemberReply::void(echo),
        GuestValue::Bool(b) => MemberReply::new(TypeCode::Boolean, echo, b.to_string()),
        GuestValue::Int(n) => MemberReply::new(TypeCode::Number, echo, n.to_string()),
        GuestValue::Float(n) => MemberReply::new(TypeCode::Number, echo, format_number(n)),
        GuestValue::Char(c) => MemberReply::new(TypeCode::String, echo, c.to_string()),
        GuestValue::Str(s) => MemberReply::new(TypeCode::String, echo, s),
        GuestValue::Object(object) => {
            let description = object.describe();
            let minted = table.insert(object);
            MemberReply::new(TypeCode::Object, minted.get(), description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::testing::Bag;
    use crate::scripting::value::ValueType;
    use std::sync::Arc;

    fn point() -> GuestObject {
        Arc::new(
            Bag::new("Point")
                .with_field("x", ValueType::Int, GuestValue::Int(3))
                .with_field("label", ValueType::Str, GuestValue::from("origin"))
                .with_field("nothing", ValueType::Object, GuestValue::Null)
                .with_method("add", vec![ValueType::Int, ValueType::Int], |args| {
                    let sum = args.iter().filter_map(GuestValue::as_i64).sum::<i64>();
                    Ok(GuestValue::Int(sum))
                })
                .with_method("add", vec![ValueType::Int], |args| Ok(args[0].clone()))
                .with_method("child", vec![], |_| Ok(GuestValue::object(Bag::new("Child"))))
                .with_method("reset", vec![], |_| Ok(GuestValue::Null)),
        )
    }

    fn action(handle: u64, kind: ActionKind) -> Action {
        Action {
            ticket: 1,
            handle: ObjectHandle::new(handle),
            kind,
        }
    }

    fn get(name: &str) -> ActionKind {
        ActionKind::Get { name: name.into() }
    }

    fn call(name: &str, args: &[&str]) -> ActionKind {
        ActionKind::Call {
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn get_reads_field_before_methods() {
        let root = point();
        let table = ObjectHandleTable::new();
        let reply = action(0, get("x")).apply(Some(&root), &table);
        assert_eq!(reply, MemberReply::new(TypeCode::Number, 0, "3"));
    }

    #[test]
    fn get_on_method_name_returns_function_marker() {
        let root = point();
        let table = ObjectHandleTable::new();
        let reply = action(0, get("add")).apply(Some(&root), &table);
        assert_eq!(reply.type_code, TypeCode::Function);
    }

    #[test]
    fn get_null_field_is_void() {
        let root = point();
        let table = ObjectHandleTable::new();
        let reply = action(0, get("nothing")).apply(Some(&root), &table);
        assert_eq!(reply, MemberReply::void(0));
    }

    #[test]
    fn unknown_member_is_error() {
        let root = point();
        let table = ObjectHandleTable::new();
        let reply = action(0, get("missing")).apply(Some(&root), &table);
        assert_eq!(reply.type_code, TypeCode::Error);
        assert_eq!(reply.handle, 0);
    }

    #[test]
    fn call_picks_overload_by_arity_and_coerces() {
        let root = point();
        let table = ObjectHandleTable::new();
        let reply = action(0, call("add", &["2", "5"])).apply(Some(&root), &table);
        assert_eq!(reply, MemberReply::new(TypeCode::Number, 0, "7"));
        let reply = action(0, call("add", &["9"])).apply(Some(&root), &table);
        assert_eq!(reply, MemberReply::new(TypeCode::Number, 0, "9"));
    }

    #[test]
    fn call_falls_through_to_overload_whose_arguments_coerce() {
        let root: GuestObject = Arc::new(
            Bag::new("Printer")
                .with_method("show", vec![ValueType::Int], |args| {
                    Ok(GuestValue::from(format!("int:{}", args[0].as_i64().unwrap_or_default())))
                })
                .with_method("show", vec![ValueType::Str], |args| {
                    Ok(GuestValue::from(format!("str:{}", args[0].as_str().unwrap_or_default())))
                }),
        );
        let table = ObjectHandleTable::new();
        let reply = action(0, call("show", &["5"])).apply(Some(&root), &table);
        insta::assert_snapshot!(reply.value, @"int:5");
        let reply = action(0, call("show", &["five"])).apply(Some(&root), &table);
        insta::assert_snapshot!(reply.value, @"str:five");
    }

    #[test]
    fn call_with_bad_argument_is_error() {
        let root = point();
        let table = ObjectHandleTable::new();
        let reply = action(0, call("add", &["two", "5"])).apply(Some(&root), &table);
        assert_eq!(reply.type_code, TypeCode::Error);
    }

    #[test]
    fn call_returning_null_is_void() {
        let root = point();
        let table = ObjectHandleTable::new();
        let reply = action(0, call("reset", &[])).apply(Some(&root), &table);
        assert_eq!(reply.type_code, TypeCode::Void);
    }

    #[test]
    fn object_result_mints_handle_usable_for_later_calls() {
        let root = point();
        let table = ObjectHandleTable::new();
        let reply = action(0, call("child", &[])).apply(Some(&root), &table);
        assert_eq!(reply.type_code, TypeCode::Object);
        assert_eq!(reply.value, "[object Child]");
        assert_ne!(reply.handle, 0);

        let child = ObjectHandle::new(reply.handle);
        let again = action(reply.handle, get("anything")).apply(Some(&root), &table);
        assert_eq!(again.type_code, TypeCode::Error);
        assert!(again.value.contains("no member"));

        table.remove(child);
        let gone = action(reply.handle, get("anything")).apply(Some(&root), &table);
        assert_eq!(gone.value, format!("handle {} not found", reply.handle));
    }

    #[test]
    fn put_coerces_to_field_type() {
        let root = point();
        let table = ObjectHandleTable::new();
        let put = ActionKind::Put {
            name: "x".into(),
            value: "11".into(),
        };
        assert_eq!(action(0, put).apply(Some(&root), &table), MemberReply::void(0));
        let reply = action(0, get("x")).apply(Some(&root), &table);
        assert_eq!(reply.value, "11");

        let bad = ActionKind::Put {
            name: "x".into(),
            value: "eleven".into(),
        };
        assert_eq!(action(0, bad).apply(Some(&root), &table).type_code, TypeCode::Error);
    }

    #[test]
    fn component_without_scriptable_object_fails() {
        let table = ObjectHandleTable::new();
        let reply = action(0, get("x")).apply(None, &table);
        assert_eq!(reply.type_code, TypeCode::Error);
    }
}
