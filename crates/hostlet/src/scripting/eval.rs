//! Guest-initiated evaluation in the controller's script engine.
//!
//! A guest thread builds a script expression, sends it as `ScriptEval` and
//! blocks until the controller answers through the component's single
//! pending-result slot, or until the evaluation timeout elapses. A timeout
//! yields [`ScriptValue::Void`], never an error.
//!
//! Answers arrive as a `PutMember` on the reserved name [`RETURN_SLOT`]
//! whose value is `<tag> <payload>`:
//!
//! | tag | meaning |
//! |-----|---------|
//! | `V` | void |
//! | `N` | number |
//! | `S` | string |
//! | `E` | script error |
//! | integer | controller object with that handle, payload describes it |

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

use super::handles::{ObjectHandle, ObjectHandleTable};
use super::object::GuestObject;
use super::value::format_number;
use crate::bridge::protocol::Message;
use crate::bridge::transport::Outbound;
use crate::lock::{lock, wait_timeout_while};

/// Member name the controller uses to deliver evaluation results.
pub const RETURN_SLOT: &str = "__lc_ret";

/// Process-wide source of evaluation tickets. Never reuses a value.
#[derive(Debug, Default)]
pub struct TicketCounter(AtomicU64);

impl TicketCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// An object living in the controller's script engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub handle: u64,
    pub description: String,
}

impl RemoteObject {
    /// The controller's global object.
    pub fn window() -> Self {
        Self {
            handle: 0,
            description: "[object Window]".to_string(),
        }
    }
}

/// Values exchanged with the controller's script engine.
#[derive(Clone)]
pub enum ScriptValue {
    Void,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Remote(RemoteObject),
    /// A guest object the controller handed back by reference.
    Guest(GuestObject),
}

impl std::fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Void => f.write_str("Void"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Remote(r) => write!(f, "Remote({})", r.handle),
            Self::Guest(g) => write!(f, "Guest({})", g.class_name()),
        }
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Void, Self::Void) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Remote(a), Self::Remote(b)) => a == b,
            (Self::Guest(a), Self::Guest(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("script error: {0}")]
    Script(String),

    #[error("malformed evaluation result {0:?}")]
    Malformed(String),
}

/// Escape text for embedding inside a quoted script string.
///
/// `\r\n` and a lone `\r` both fold to `\n`. NUL becomes `\0` so the
/// escaped text stays framable.
pub fn escape_script_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out
}

/// Render an argument as script source.
pub fn render_value(value: &ScriptValue) -> String {
    match value {
        ScriptValue::Void | ScriptValue::Null => "null".to_string(),
        ScriptValue::Bool(b) => b.to_string(),
        ScriptValue::Number(n) => format_number(*n),
        ScriptValue::String(s) => format!("\"{}\"", escape_script_string(s)),
        ScriptValue::Remote(remote) => format!("window.__lc[0][{}]", remote.handle),
        ScriptValue::Guest(object) => format!("\"{}\"", escape_script_string(&object.describe())),
    }
}

// The ticket stays local: answers carry no correlation id, so whichever
// evaluation is pending takes the next answer. A late answer to one that
// timed out is therefore consumed by the next evaluation on this component.
struct PendingEval {
    ticket: u64,
    answer: Option<String>,
}

/// The single pending-result slot of one component.
#[derive(Default)]
struct EvalSlot {
    gate: Mutex<()>,
    pending: Mutex<Option<PendingEval>>,
    answered: Condvar,
}

/// Scripting state of one component: its handle table, its root object, and
/// its evaluation slot.
pub struct ScriptBridge {
    context_id: String,
    component_id: String,
    outbound: Outbound,
    tickets: Arc<TicketCounter>,
    eval_timeout: Duration,
    table: ObjectHandleTable,
    root: RwLock<Option<GuestObject>>,
    slot: EvalSlot,
    /// Set while the component accepts script traffic.
    active: AtomicBool,
}

impl ScriptBridge {
    pub fn new(
        context_id: impl Into<String>,
        component_id: impl Into<String>,
        outbound: Outbound,
        tickets: Arc<TicketCounter>,
        eval_timeout: Duration,
    ) -> Self {
        Self {
            context_id: context_id.into(),
            component_id: component_id.into(),
            outbound,
            tickets,
            eval_timeout,
            table: ObjectHandleTable::new(),
            root: RwLock::new(None),
            slot: EvalSlot::default(),
            active: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn table(&self) -> &ObjectHandleTable {
        &self.table
    }

    pub fn root(&self) -> Option<GuestObject> {
        self.root
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_root(&self, root: Option<GuestObject>) {
        *self
            .root
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = root;
    }

    /// Make a guest object reachable from script and return its handle.
    pub fn register(&self, object: GuestObject) -> ObjectHandle {
        self.table.insert(object)
    }

    /// Drop every handle and the root (component destruction).
    pub(crate) fn release_all(&self) -> usize {
        self.set_active(false);
        self.set_root(None);
        self.table.clear()
    }

    pub fn get_member(&self, object: &RemoteObject, name: &str) -> Result<ScriptValue, EvalError> {
        self.evaluate(Some(object.handle), format!(".{name}"))
    }

    pub fn set_member(
        &self,
        object: &RemoteObject,
        name: &str,
        value: &ScriptValue,
    ) -> Result<(), EvalError> {
        self.evaluate(Some(object.handle), format!(".{name}={}", render_value(value)))
            .map(drop)
    }

    pub fn remove_member(&self, object: &RemoteObject, name: &str) -> Result<(), EvalError> {
        self.set_member(object, name, &ScriptValue::Null)
    }

    pub fn call(
        &self,
        object: &RemoteObject,
        function: &str,
        args: &[ScriptValue],
    ) -> Result<ScriptValue, EvalError> {
        let rendered: Vec<String> = args.iter().map(render_value).collect();
        self.evaluate(
            Some(object.handle),
            format!(".{function}({})", rendered.join(",")),
        )
    }

    pub fn get_slot(&self, object: &RemoteObject, index: i64) -> Result<ScriptValue, EvalError> {
        self.evaluate(Some(object.handle), format!("[{index}]"))
    }

    pub fn set_slot(
        &self,
        object: &RemoteObject,
        index: i64,
        value: &ScriptValue,
    ) -> Result<(), EvalError> {
        self.evaluate(Some(object.handle), format!("[{index}]={}", render_value(value)))
            .map(drop)
    }

    /// Evaluate a script in the controller's global scope.
    pub fn eval(&self, script: &str) -> Result<ScriptValue, EvalError> {
        self.evaluate(None, script.to_string())
    }

    fn evaluate(&self, handle: Option<u64>, script: String) -> Result<ScriptValue, EvalError> {
        if !self.active.load(Ordering::Acquire) {
            tracing::debug!(
                context_id = %self.context_id,
                component_id = %self.component_id,
                "Component not active, skipping script evaluation"
            );
            return Ok(ScriptValue::Void);
        }

        // One evaluation in flight per component; later callers queue here.
        let _gate = lock(&self.slot.gate);

        let ticket = self.tickets.next();
        *lock(&self.slot.pending) = Some(PendingEval {
            ticket,
            answer: None,
        });

        tracing::debug!(
            context_id = %self.context_id,
            component_id = %self.component_id,
            ticket,
            ?handle,
            "Sending script evaluation"
        );
        let sent = self.outbound.send(Message::ScriptEval {
            context_id: self.context_id.clone(),
            component_id: self.component_id.clone(),
            handle,
            script,
        });
        if let Err(e) = sent {
            *lock(&self.slot.pending) = None;
            tracing::warn!(ticket, error = %e, "Could not send script evaluation");
            return Ok(ScriptValue::Void);
        }

        let guard = lock(&self.slot.pending);
        let (mut guard, _) =
            wait_timeout_while(&self.slot.answered, guard, self.eval_timeout, |pending| {
                pending.as_ref().is_some_and(|p| p.answer.is_none())
            });
        let answer = guard.take().and_then(|p| p.answer);
        drop(guard);

        match answer {
            Some(raw) => self.parse_answer(&raw),
            None => {
                tracing::info!(
                    context_id = %self.context_id,
                    component_id = %self.component_id,
                    ticket,
                    "Script evaluation timed out, returning void"
                );
                Ok(ScriptValue::Void)
            }
        }
    }

    /// Hand a controller answer to the waiting evaluation.
    ///
    /// Returns the ticket that took it, or `None` when nothing is waiting
    /// (the answer is stale).
    pub fn deliver(&self, raw: String) -> Option<u64> {
        let mut pending = lock(&self.slot.pending);
        match pending.as_mut() {
            Some(p) if p.answer.is_none() => {
                p.answer = Some(raw);
                let ticket = p.ticket;
                drop(pending);
                self.slot.answered.notify_all();
                Some(ticket)
            }
            _ => {
                tracing::debug!(
                    context_id = %self.context_id,
                    component_id = %self.component_id,
                    "Dropping stale evaluation result"
                );
                None
            }
        }
    }

    fn parse_answer(&self, raw: &str) -> Result<ScriptValue, EvalError> {
        let (tag, payload) = raw.split_once(' ').unwrap_or((raw, ""));
        match tag {
            "V" => Ok(ScriptValue::Void),
            "N" => payload
                .trim()
                .parse()
                .map(ScriptValue::Number)
                .map_err(|_| EvalError::Malformed(raw.to_string())),
            "S" => Ok(ScriptValue::String(payload.to_string())),
            "E" => Err(EvalError::Script(payload.to_string())),
            _ => {
                let handle: u64 = tag
                    .parse()
                    .map_err(|_| EvalError::Malformed(raw.to_string()))?;
                if let Some(guest) = self.guest_reference(payload) {
                    return Ok(ScriptValue::Guest(guest));
                }
                Ok(ScriptValue::Remote(RemoteObject {
                    handle,
                    description: payload.to_string(),
                }))
            }
        }
    }

    // "[object Foo ref=7]" names guest handle 7; ref=0 is the component.
    fn guest_reference(&self, description: &str) -> Option<GuestObject> {
        let inner = description.strip_prefix("[object ")?.strip_suffix(']')?;
        let (_, reference) = inner.rsplit_once("ref=")?;
        let handle = ObjectHandle::new(reference.trim().parse().ok()?);
        if handle.is_component() {
            self.root()
        } else {
            self.table.get(handle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::transport::OutboundReceiver;
    use crate::scripting::testing::Bag;
    use std::thread;

    fn bridge(timeout: Duration) -> (Arc<ScriptBridge>, OutboundReceiver) {
        let (outbound, rx) = Outbound::channel();
        let bridge = ScriptBridge::new("c1", "a1", outbound, Arc::new(TicketCounter::new()), timeout);
        bridge.set_active(true);
        (Arc::new(bridge), rx)
    }

    fn sent_script(rx: &mut OutboundReceiver) -> (Option<u64>, String) {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Some(Message::ScriptEval { handle, script, .. }) => (handle, script),
            other => panic!("expected ScriptEval, got {other:?}"),
        }
    }

    fn answer_with(
        bridge: &Arc<ScriptBridge>,
        rx: &mut OutboundReceiver,
        request: impl FnOnce(&ScriptBridge) -> Result<ScriptValue, EvalError> + Send + 'static,
        answer: &str,
    ) -> ((Option<u64>, String), Result<ScriptValue, EvalError>) {
        let worker = {
            let bridge = Arc::clone(bridge);
            thread::spawn(move || request(&bridge))
        };
        let sent = sent_script(rx);
        assert!(bridge.deliver(answer.to_string()).is_some());
        (sent, worker.join().unwrap())
    }

    #[test]
    fn escapes_quotes_backslashes_and_newlines() {
        insta::assert_snapshot!(
            escape_script_string("a\\b \"q\"\r\nline\rnext\nend"),
            @r#"a\\b \"q\"\nline\nnext\nend"#
        );
    }

    #[test]
    fn escapes_nul() {
        assert_eq!(escape_script_string("a\0b"), "a\\0b");
    }

    #[test]
    fn renders_arguments() {
        let window = ScriptValue::Remote(RemoteObject::window());
        let rendered: Vec<String> = [
            ScriptValue::Null,
            ScriptValue::Bool(true),
            ScriptValue::Number(2.0),
            ScriptValue::String("say \"hi\"".into()),
            window,
        ]
        .iter()
        .map(render_value)
        .collect();
        insta::assert_snapshot!(rendered.join(","), @r#"null,true,2,"say \"hi\"",window.__lc[0][0]"#);
    }

    #[test]
    fn get_member_round_trip() {
        let (bridge, mut rx) = bridge(Duration::from_secs(5));
        let (sent, result) = answer_with(
            &bridge,
            &mut rx,
            |b| b.get_member(&RemoteObject::window(), "innerWidth"),
            "N 1024",
        );
        assert_eq!(sent, (Some(0), ".innerWidth".to_string()));
        assert_eq!(result.unwrap(), ScriptValue::Number(1024.0));
    }

    #[test]
    fn call_renders_escaped_arguments() {
        let (bridge, mut rx) = bridge(Duration::from_secs(5));
        let doc = RemoteObject {
            handle: 7,
            description: "[object HTMLDocument]".into(),
        };
        let (sent, result) = answer_with(
            &bridge,
            &mut rx,
            move |b| b.call(&doc, "write", &[ScriptValue::String("<p>\n".into()), ScriptValue::Number(1.5)]),
            "V",
        );
        assert_eq!(sent, (Some(7), ".write(\"<p>\\n\",1.5)".to_string()));
        assert_eq!(result.unwrap(), ScriptValue::Void);
    }

    #[test]
    fn global_eval_has_no_handle() {
        let (bridge, mut rx) = bridge(Duration::from_secs(5));
        let (sent, result) = answer_with(&bridge, &mut rx, |b| b.eval("document.title"), "S My page");
        assert_eq!(sent, (None, "document.title".to_string()));
        assert_eq!(result.unwrap(), ScriptValue::String("My page".into()));
    }

    #[test]
    fn object_answer_becomes_remote_object() {
        let (bridge, mut rx) = bridge(Duration::from_secs(5));
        let (_, result) = answer_with(
            &bridge,
            &mut rx,
            |b| b.get_member(&RemoteObject::window(), "document"),
            "12 [object HTMLDocument]",
        );
        assert_eq!(
            result.unwrap(),
            ScriptValue::Remote(RemoteObject {
                handle: 12,
                description: "[object HTMLDocument]".into()
            })
        );
    }

    #[test]
    fn guest_reference_resolves_back_to_guest_object() {
        let (bridge, mut rx) = bridge(Duration::from_secs(5));
        let object: GuestObject = Arc::new(Bag::new("Child"));
        let handle = bridge.register(object.clone());
        let answer = format!("3 [object Child ref={handle}]");
        let (_, result) = answer_with(
            &bridge,
            &mut rx,
            |b| b.get_slot(&RemoteObject::window(), 0),
            &answer,
        );
        assert_eq!(result.unwrap(), ScriptValue::Guest(object));
    }

    #[test]
    fn error_answer_is_script_error() {
        let (bridge, mut rx) = bridge(Duration::from_secs(5));
        let (_, result) = answer_with(&bridge, &mut rx, |b| b.eval("nope()"), "E nope is not defined");
        assert!(matches!(result, Err(EvalError::Script(msg)) if msg == "nope is not defined"));
    }

    #[test]
    fn timeout_returns_void_and_late_answer_is_stale() {
        let (bridge, mut rx) = bridge(Duration::from_millis(30));
        let result = bridge.eval("slow()").unwrap();
        assert_eq!(result, ScriptValue::Void);
        assert!(matches!(rx.try_recv(), Some(Message::ScriptEval { .. })));
        assert_eq!(bridge.deliver("N 1".into()), None);
    }

    #[test]
    fn inactive_component_evaluates_to_void_without_sending() {
        let (bridge, mut rx) = bridge(Duration::from_secs(30));
        bridge.set_active(false);
        assert_eq!(bridge.eval("document.title").unwrap(), ScriptValue::Void);
        assert!(rx.try_recv().is_none());

        bridge.release_all();
        assert_eq!(bridge.eval("again").unwrap(), ScriptValue::Void);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn answer_without_waiter_is_stale() {
        let (bridge, _rx) = bridge(Duration::from_secs(1));
        assert_eq!(bridge.deliver("V".into()), None);
    }

    #[test]
    fn tickets_are_never_reused() {
        let (bridge, mut rx) = bridge(Duration::from_millis(5));
        let counter = Arc::clone(&bridge.tickets);
        bridge.eval("a").unwrap();
        bridge.eval("b").unwrap();
        while rx.try_recv().is_some() {}
        assert_eq!(counter.next(), 3);
    }
}
