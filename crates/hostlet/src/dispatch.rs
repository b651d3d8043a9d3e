//! Routes decoded commands to contexts, components, stream jobs and the
//! permission broker.
//!
//! Dispatch never blocks: lifecycle work and member actions are handed to
//! component workers, and everything else is a map lookup plus a queue push.

use std::io;
use std::sync::Arc;

use crate::bridge::protocol::{Command, MemberOp, MemberReply, Message};
use crate::component::{Component, ComponentSpec, LifecycleState};
use crate::guest::ConsoleSurface;
use crate::permission::Decision;
use crate::registry::{Context, ContextRegistry};
use crate::scripting::{Action, ActionKind, ObjectHandle, RETURN_SLOT};
use crate::services::HostServices;

/// Whether the transport loop keeps reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown context {0}")]
    UnknownContext(String),

    #[error("unknown component {component_id} in context {context_id}")]
    UnknownComponent {
        context_id: String,
        component_id: String,
    },

    #[error("failed to start worker for component {component_id}: {source}")]
    Spawn {
        component_id: String,
        source: io::Error,
    },
}

pub struct Dispatcher {
    services: HostServices,
    registry: ContextRegistry,
    console: Option<Arc<dyn ConsoleSurface>>,
}

impl Dispatcher {
    pub fn new(services: HostServices, console: Option<Arc<dyn ConsoleSurface>>) -> Self {
        Self {
            services,
            registry: ContextRegistry::new(),
            console,
        }
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    pub fn dispatch(&self, command: Command) -> Result<Flow, DispatchError> {
        tracing::trace!(code = %command.code(), "Dispatching command");
        match command {
            Command::CreateContext { context_id } => {
                self.registry.create(&context_id);
                tracing::debug!(%context_id, "Context created");
            }
            Command::DestroyContext { context_id } => {
                if self.registry.destroy(&context_id).is_none() {
                    return Err(DispatchError::UnknownContext(context_id));
                }
            }
            Command::CreateComponent(request) => {
                let spec = ComponentSpec::from_request(*request);
                self.create_component(spec)?;
            }
            Command::DestroyComponent {
                context_id,
                component_id,
            } => {
                let context = self.context(&context_id)?;
                if !context.destroy_component(&component_id) {
                    return Err(DispatchError::UnknownComponent {
                        context_id,
                        component_id,
                    });
                }
            }
            Command::StartComponent {
                context_id,
                component_id,
            } => {
                self.component(&context_id, &component_id)?
                    .request(LifecycleState::Started);
            }
            Command::StopComponent {
                context_id,
                component_id,
            } => {
                self.component(&context_id, &component_id)?
                    .request(LifecycleState::Stopped);
            }
            Command::InitComponent {
                context_id,
                component_id,
            } => {
                self.component(&context_id, &component_id)?
                    .request(LifecycleState::Initialized);
            }
            Command::UrlData {
                job_id,
                subcode,
                data,
            } => self.services.streams.deliver(&job_id, subcode, data),
            Command::Shutdown => return Ok(Flow::Shutdown),
            Command::GetMember {
                ticket,
                context_id,
                component_id,
                handle,
                name,
            } => self.member_action(
                &context_id,
                &component_id,
                Action {
                    ticket,
                    handle: ObjectHandle::new(handle),
                    kind: ActionKind::Get { name },
                },
            ),
            Command::CallMember {
                ticket,
                context_id,
                component_id,
                handle,
                name,
                args,
            } => self.member_action(
                &context_id,
                &component_id,
                Action {
                    ticket,
                    handle: ObjectHandle::new(handle),
                    kind: ActionKind::Call { name, args },
                },
            ),
            Command::PutMember {
                ticket,
                context_id,
                component_id,
                handle,
                name,
                value,
            } if name == RETURN_SLOT => {
                self.eval_answer(ticket, &context_id, &component_id, handle, value)
            }
            Command::PutMember {
                ticket,
                context_id,
                component_id,
                handle,
                name,
                value,
            } => self.member_action(
                &context_id,
                &component_id,
                Action {
                    ticket,
                    handle: ObjectHandle::new(handle),
                    kind: ActionKind::Put { name, value },
                },
            ),
            Command::DerefObject {
                context_id,
                component_id,
                handle,
            } => {
                let handle = ObjectHandle::new(handle);
                if handle.is_component() {
                    tracing::debug!(%context_id, %component_id, "Ignoring deref of component handle");
                } else if !self
                    .component(&context_id, &component_id)?
                    .deref_object(handle)
                {
                    tracing::debug!(%context_id, %component_id, %handle, "Deref of unknown handle");
                }
            }
            Command::PermissionConfirm { ticket, decision } => {
                self.services
                    .permissions
                    .answer(&ticket, Decision::parse(&decision));
            }
            Command::ShowConsole => match &self.console {
                Some(console) => console.show(),
                None => tracing::debug!("No console surface, ignoring ShowConsole"),
            },
        }
        Ok(Flow::Continue)
    }

    /// Ask every component to destroy itself. Returns how many were asked.
    pub fn destroy_all(&self) -> usize {
        self.registry.destroy_all()
    }

    fn context(&self, context_id: &str) -> Result<Arc<Context>, DispatchError> {
        self.registry
            .get(context_id)
            .ok_or_else(|| DispatchError::UnknownContext(context_id.to_string()))
    }

    fn component(
        &self,
        context_id: &str,
        component_id: &str,
    ) -> Result<Arc<Component>, DispatchError> {
        self.context(context_id)?
            .component(component_id)
            .ok_or_else(|| DispatchError::UnknownComponent {
                context_id: context_id.to_string(),
                component_id: component_id.to_string(),
            })
    }

    fn create_component(&self, spec: ComponentSpec) -> Result<(), DispatchError> {
        let context_id = spec.context_id.clone();
        let component_id = spec.component_id.clone();
        let context = match self.context(&context_id) {
            Ok(context) => context,
            Err(e) => {
                self.report_failure(&context_id, &component_id, &e.to_string());
                return Err(e);
            }
        };

        tracing::info!(
            %context_id,
            %component_id,
            class = %spec.class_name,
            "Creating component"
        );
        match Component::spawn(spec, self.services.clone()) {
            Ok(component) => {
                context.insert(component);
                Ok(())
            }
            Err(source) => {
                self.report_failure(&context_id, &component_id, &source.to_string());
                Err(DispatchError::Spawn {
                    component_id,
                    source,
                })
            }
        }
    }

    fn member_action(&self, context_id: &str, component_id: &str, action: Action) {
        match self.component(context_id, component_id) {
            Ok(component) => component.submit(action),
            Err(e) => {
                tracing::debug!(ticket = action.ticket, error = %e, "Member request for unknown target");
                let reply = action.rejected(&e.to_string());
                self.send_result(action.op(), context_id, action.ticket, reply);
            }
        }
    }

    fn eval_answer(
        &self,
        ticket: u64,
        context_id: &str,
        component_id: &str,
        handle: u64,
        value: String,
    ) {
        let reply = match self.component(context_id, component_id) {
            Ok(component) => match component.bridge().deliver(value) {
                Some(eval_ticket) => {
                    tracing::trace!(ticket, eval_ticket, "Evaluation answered");
                    MemberReply::void(handle)
                }
                None => MemberReply::error(handle, "no evaluation is waiting"),
            },
            Err(e) => MemberReply::error(handle, e.to_string()),
        };
        self.send_result(MemberOp::Put, context_id, ticket, reply);
    }

    fn send_result(&self, op: MemberOp, context_id: &str, ticket: u64, reply: MemberReply) {
        let sent = self.services.outbound.send(Message::MemberResult {
            op,
            context_id: context_id.to_string(),
            ticket,
            reply,
        });
        if let Err(e) = sent {
            tracing::warn!(ticket, error = %e, "Failed to queue member result");
        }
    }

    fn report_failure(&self, context_id: &str, component_id: &str, message: &str) {
        let sent = self.services.outbound.send(Message::ComponentFailed {
            context_id: context_id.to_string(),
            component_id: component_id.to_string(),
            message: message.to_string(),
        });
        if let Err(e) = sent {
            tracing::warn!(error = %e, "Failed to queue component failure");
        }
    }
}
