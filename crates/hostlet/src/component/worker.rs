//! Per-component lifecycle worker.
//!
//! The worker thread drives its component one state at a time toward the
//! requested target and services queued member actions between steps. The
//! dispatcher only ever touches [`WorkerControl`], which never blocks on
//! guest code.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};

use super::host::ComponentHost;
use super::state::LifecycleState;
use super::Component;
use crate::bridge::protocol::Message;
use crate::guest::{GuestClass, GuestError, GuestInstance};
use crate::lock::{lock, wait_while};
use crate::scripting::Action;

struct WorkerState {
    current: LifecycleState,
    target: LifecycleState,
    actions: VecDeque<Action>,
    exited: bool,
}

/// What the worker should do next.
pub(crate) enum Step {
    Transition(LifecycleState),
    Action(Action),
    Reject(Action),
    /// Terminal state reached. Carries actions that will never run.
    Exit(Vec<Action>),
}

/// Requested state, current state and action queue of one component.
pub struct WorkerControl {
    state: Mutex<WorkerState>,
    changed: Condvar,
}

impl WorkerControl {
    pub(crate) fn new(initial_target: LifecycleState) -> Self {
        Self {
            state: Mutex::new(WorkerState {
                current: LifecycleState::Unloaded,
                target: initial_target,
                actions: VecDeque::new(),
                exited: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn current(&self) -> LifecycleState {
        lock(&self.state).current
    }

    pub fn target(&self) -> LifecycleState {
        lock(&self.state).target
    }

    /// Ask the worker to move toward `target`.
    ///
    /// Requests only move forward. `Destroyed` always wins and nothing
    /// overrides it. Returns whether the request changed the target.
    pub fn request(&self, target: LifecycleState) -> bool {
        let mut st = lock(&self.state);
        if st.current.is_terminal() || st.target == LifecycleState::Destroyed {
            return false;
        }
        let floor = st.current.max(st.target);
        if target != LifecycleState::Destroyed && target <= floor {
            return false;
        }
        st.target = target;
        drop(st);
        self.changed.notify_all();
        true
    }

    /// Queue an action. Hands it back when the component is not between
    /// `Initialized` and `Stopped`.
    pub fn enqueue(&self, action: Action) -> Result<(), Action> {
        let mut st = lock(&self.state);
        if st.exited || !st.current.accepts_actions() {
            return Err(action);
        }
        st.actions.push_back(action);
        drop(st);
        self.changed.notify_all();
        Ok(())
    }

    pub(crate) fn next_step(&self) -> Step {
        let st = lock(&self.state);
        let mut st = wait_while(&self.changed, st, |st| {
            st.current.next_toward(st.target).is_none()
                && !st.current.is_terminal()
                && st.actions.is_empty()
        });

        // Lifecycle steps take priority over queued actions.
        if let Some(next) = st.current.next_toward(st.target) {
            return Step::Transition(next);
        }
        if st.current.is_terminal() {
            st.exited = true;
            return Step::Exit(st.actions.drain(..).collect());
        }
        match st.actions.pop_front() {
            Some(action) if st.current.accepts_actions() => Step::Action(action),
            Some(action) => Step::Reject(action),
            // Unreachable given the wait condition.
            None => Step::Exit(Vec::new()),
        }
    }

    pub(crate) fn complete(&self, state: LifecycleState) {
        lock(&self.state).current = state;
        self.changed.notify_all();
    }
}

/// Outcome of a failed lifecycle hook.
struct HookFailure {
    error: GuestError,
    panicked: bool,
}

fn guarded<T>(
    hook: &'static str,
    f: impl FnOnce() -> Result<T, GuestError>,
) -> Result<T, HookFailure> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(HookFailure {
            error,
            panicked: false,
        }),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            Err(HookFailure {
                error: GuestError::hook(hook, format!("panicked: {message}")),
                panicked: true,
            })
        }
    }
}

/// State owned by the worker thread alone.
struct GuestSlot {
    class: Option<Box<dyn GuestClass>>,
    instance: Option<Box<dyn GuestInstance>>,
}

impl GuestSlot {
    fn instance(&mut self, hook: &'static str) -> Result<&mut Box<dyn GuestInstance>, GuestError> {
        self.instance
            .as_mut()
            .ok_or_else(|| GuestError::hook(hook, "component was never instantiated"))
    }
}

/// Body of a component worker thread.
pub(crate) fn run(component: Arc<Component>) {
    let ctx = component.spec.context_id.clone();
    let id = component.spec.component_id.clone();
    tracing::debug!(context_id = %ctx, component_id = %id, "Component worker started");

    let mut guest = GuestSlot {
        class: None,
        instance: None,
    };

    loop {
        match component.control.next_step() {
            Step::Transition(state) => transition(&component, &mut guest, state),
            Step::Action(action) => {
                let reply = action.apply(component.bridge.root().as_ref(), component.bridge.table());
                component.send_member_result(&action, reply);
            }
            Step::Reject(action) => {
                let reply = action.rejected("component is not accepting script requests");
                component.send_member_result(&action, reply);
            }
            Step::Exit(leftover) => {
                for action in leftover {
                    let reply = action.rejected("component is gone");
                    component.send_member_result(&action, reply);
                }
                break;
            }
        }
    }

    tracing::debug!(context_id = %ctx, component_id = %id, "Component worker exiting");
}

fn transition(component: &Arc<Component>, guest: &mut GuestSlot, state: LifecycleState) {
    let ctx = &component.spec.context_id;
    let id = &component.spec.component_id;
    tracing::debug!(context_id = %ctx, component_id = %id, %state, "Entering state");

    match enter(component, guest, state) {
        Ok(()) => {}
        Err(failure) if failure.panicked || state < LifecycleState::Initialized => {
            tracing::error!(
                context_id = %ctx,
                component_id = %id,
                %state,
                error = %failure.error,
                "Component failed"
            );
            fail(component, guest, failure.error.to_string());
            return;
        }
        Err(failure) => {
            tracing::warn!(
                context_id = %ctx,
                component_id = %id,
                %state,
                error = %failure.error,
                "Lifecycle hook failed, continuing"
            );
        }
    }

    component.control.complete(state);
    component.bridge.set_active(state.accepts_actions());
    component.notify(state);
}

fn enter(
    component: &Arc<Component>,
    guest: &mut GuestSlot,
    state: LifecycleState,
) -> Result<(), HookFailure> {
    let surface = component.surface.as_ref();
    match state {
        LifecycleState::ClassLoaded => {
            let loader = &component.services.loader;
            guest.class = Some(guarded("load", || loader.load(&component.spec))?);
        }
        LifecycleState::Instantiated => {
            let host = ComponentHost::new(Arc::clone(component));
            let instance = guarded("instantiate", || match guest.class.as_ref() {
                Some(class) => class.instantiate(host),
                None => Err(GuestError::instantiate(
                    component.spec.class_name.clone(),
                    "class was never loaded",
                )),
            })?;
            component.bridge.set_root(instance.scriptable());
            guest.instance = Some(instance);
        }
        LifecycleState::Initialized => {
            guarded("init", || guest.instance("init")?.init())?;
            if let Some(surface) = surface {
                surface.show();
            }
        }
        LifecycleState::Started => {
            guarded("start", || guest.instance("start")?.start())?;
        }
        LifecycleState::Stopped => {
            let stopped = guarded("stop", || guest.instance("stop")?.stop());
            if let Some(surface) = surface {
                surface.hide();
            }
            stopped?;
        }
        LifecycleState::Destroyed => {
            if let Some(instance) = guest.instance.as_mut()
                && let Err(failure) = guarded("destroy", || instance.destroy())
            {
                tracing::warn!(
                    context_id = %component.spec.context_id,
                    component_id = %component.spec.component_id,
                    error = %failure.error,
                    "Destroy hook failed"
                );
            }
            release(component, guest);
        }
        LifecycleState::Unloaded | LifecycleState::Failed => {}
    }
    Ok(())
}

fn release(component: &Component, guest: &mut GuestSlot) {
    guest.instance = None;
    guest.class = None;
    if let Some(surface) = component.surface.as_ref() {
        surface.dispose();
    }
    let released = component.bridge.release_all();
    tracing::debug!(
        context_id = %component.spec.context_id,
        component_id = %component.spec.component_id,
        released,
        "Released object handles"
    );
}

fn fail(component: &Component, guest: &mut GuestSlot, message: String) {
    release(component, guest);
    component.control.complete(LifecycleState::Failed);
    let sent = component.services.outbound.send(Message::ComponentFailed {
        context_id: component.spec.context_id.clone(),
        component_id: component.spec.component_id.clone(),
        message,
    });
    if let Err(e) = sent {
        tracing::warn!(error = %e, "Failed to report component failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::{ActionKind, ObjectHandle};

    fn get(ticket: u64) -> Action {
        Action {
            ticket,
            handle: ObjectHandle::COMPONENT,
            kind: ActionKind::Get { name: "x".into() },
        }
    }

    #[test]
    fn requests_only_move_forward() {
        let control = WorkerControl::new(LifecycleState::Initialized);
        control.complete(LifecycleState::Started);
        assert!(!control.request(LifecycleState::Initialized));
        assert!(control.request(LifecycleState::Stopped));
        assert!(!control.request(LifecycleState::Started));
        assert!(control.request(LifecycleState::Destroyed));
        assert!(!control.request(LifecycleState::Failed));
        assert_eq!(control.target(), LifecycleState::Destroyed);
    }

    #[test]
    fn destroy_from_started_passes_through_stopped() {
        let control = WorkerControl::new(LifecycleState::Started);
        control.complete(LifecycleState::Started);
        control.request(LifecycleState::Destroyed);

        let mut seen = Vec::new();
        loop {
            match control.next_step() {
                Step::Transition(state) => {
                    seen.push(state);
                    control.complete(state);
                }
                Step::Exit(_) => break,
                _ => panic!("unexpected step"),
            }
        }
        assert_eq!(seen, [LifecycleState::Stopped, LifecycleState::Destroyed]);
    }

    #[test]
    fn actions_are_refused_outside_the_active_window() {
        let control = WorkerControl::new(LifecycleState::Initialized);
        assert!(control.enqueue(get(1)).is_err());

        control.complete(LifecycleState::Initialized);
        assert!(control.enqueue(get(2)).is_ok());
        assert!(matches!(control.next_step(), Step::Action(a) if a.ticket == 2));

        control.complete(LifecycleState::Stopped);
        assert!(control.enqueue(get(3)).is_err());
    }

    #[test]
    fn transitions_run_before_queued_actions() {
        let control = WorkerControl::new(LifecycleState::Initialized);
        control.complete(LifecycleState::Started);
        control.enqueue(get(1)).unwrap();
        control.request(LifecycleState::Stopped);

        assert!(matches!(
            control.next_step(),
            Step::Transition(LifecycleState::Stopped)
        ));
        control.complete(LifecycleState::Stopped);
        assert!(matches!(control.next_step(), Step::Reject(a) if a.ticket == 1));
    }

    #[test]
    fn terminal_state_drains_queue_on_exit() {
        let control = WorkerControl::new(LifecycleState::Initialized);
        control.complete(LifecycleState::Initialized);
        control.enqueue(get(1)).unwrap();
        control.complete(LifecycleState::Failed);
        match control.next_step() {
            Step::Exit(left) => assert_eq!(left.len(), 1),
            _ => panic!("expected exit"),
        }
        assert!(control.enqueue(get(2)).is_err());
    }
}
