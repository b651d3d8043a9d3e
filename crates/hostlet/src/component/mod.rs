//! Components: loaded guest instances and their lifecycle.
//!
//! - **state**: lifecycle states and the step rule
//! - **spec**: component description from `CreateComponent`
//! - **worker**: per-component worker thread and its control block
//! - **host**: services exposed to guest code

mod host;
mod spec;
mod state;
mod worker;

use std::io;
use std::sync::Arc;

pub use host::ComponentHost;
pub use spec::{ComponentSpec, Credentials, Parameters};
pub use state::LifecycleState;
pub use worker::WorkerControl;

use crate::bridge::protocol::{MemberReply, Message};
use crate::guest::PresentationSurface;
use crate::scripting::{Action, ObjectHandle, ScriptBridge};
use crate::services::HostServices;

/// One loaded guest instance.
pub struct Component {
    spec: ComponentSpec,
    bridge: ScriptBridge,
    control: WorkerControl,
    surface: Option<Arc<dyn PresentationSurface>>,
    services: HostServices,
}

impl Component {
    /// Create the component and start its worker, which immediately drives
    /// it to `Initialized`.
    pub fn spawn(spec: ComponentSpec, services: HostServices) -> io::Result<Arc<Self>> {
        let surface = services.loader.surface(&spec);
        let bridge = ScriptBridge::new(
            spec.context_id.clone(),
            spec.component_id.clone(),
            services.outbound.clone(),
            Arc::clone(&services.tickets),
            services.config.eval_timeout(),
        );
        let component = Arc::new(Self {
            spec,
            bridge,
            control: WorkerControl::new(LifecycleState::Initialized),
            surface,
            services,
        });

        let name = format!(
            "component-{}-{}",
            component.spec.context_id, component.spec.component_id
        );
        let worker = Arc::clone(&component);
        component
            .services
            .supervisor
            .spawn(name, move || worker::run(worker))?;
        Ok(component)
    }

    pub fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    pub fn id(&self) -> &str {
        &self.spec.component_id
    }

    pub fn state(&self) -> LifecycleState {
        self.control.current()
    }

    pub fn bridge(&self) -> &ScriptBridge {
        &self.bridge
    }

    /// Ask the worker to move toward `target`. See [`WorkerControl::request`].
    pub fn request(&self, target: LifecycleState) -> bool {
        let changed = self.control.request(target);
        tracing::debug!(
            context_id = %self.spec.context_id,
            component_id = %self.spec.component_id,
            %target,
            changed,
            "Lifecycle request"
        );
        changed
    }

    /// Queue a member action, answering it at once when the component is
    /// not accepting script requests.
    pub fn submit(&self, action: Action) {
        if let Err(action) = self.control.enqueue(action) {
            tracing::debug!(
                context_id = %self.spec.context_id,
                component_id = %self.spec.component_id,
                ticket = action.ticket,
                state = %self.state(),
                "Rejecting member request"
            );
            let reply = action.rejected("component is not accepting script requests");
            self.send_member_result(&action, reply);
        }
    }

    /// Forget a handle. Handle 0 is never removable.
    pub fn deref_object(&self, handle: ObjectHandle) -> bool {
        self.bridge.table().remove(handle)
    }

    pub(crate) fn send_member_result(&self, action: &Action, reply: MemberReply) {
        self.send(Message::MemberResult {
            op: action.op(),
            context_id: self.spec.context_id.clone(),
            ticket: action.ticket,
            reply,
        });
    }

    fn notify(&self, state: LifecycleState) {
        self.send(Message::LifecycleNotify {
            context_id: self.spec.context_id.clone(),
            component_id: self.spec.component_id.clone(),
            state,
        });
    }

    fn send(&self, message: Message) {
        if let Err(e) = self.services.outbound.send(message) {
            tracing::warn!(
                context_id = %self.spec.context_id,
                component_id = %self.spec.component_id,
                error = %e,
                "Failed to queue outbound message"
            );
        }
    }
}
