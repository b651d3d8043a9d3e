//! Host services exposed to guest code.

use std::sync::Arc;

use super::{Component, ComponentSpec, LifecycleState};
use crate::bridge::protocol::{AudioCommand, Message};
use crate::scripting::{GuestObject, ObjectHandle, ScriptBridge};
use crate::stream::{JobReader, JobWriter, StreamError, StreamKind};

/// Handle a guest instance keeps to talk back to the controller.
///
/// Cheap to clone. Calls that wait on the controller (streams, scripting,
/// permissions) block the calling thread.
#[derive(Clone)]
pub struct ComponentHost {
    component: Arc<Component>,
}

impl ComponentHost {
    pub(crate) fn new(component: Arc<Component>) -> Self {
        Self { component }
    }

    pub fn spec(&self) -> &ComponentSpec {
        &self.component.spec
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.component.spec.param(name)
    }

    pub fn state(&self) -> LifecycleState {
        self.component.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Started
    }

    pub fn show_document(&self, url: &str) {
        self.component.send(Message::ShowDocument {
            context_id: self.component.spec.context_id.clone(),
            url: url.to_string(),
        });
    }

    pub fn show_document_in(&self, url: &str, frame: &str) {
        self.component.send(Message::ShowUrlInFrame {
            context_id: self.component.spec.context_id.clone(),
            url: url.to_string(),
            frame: frame.to_string(),
        });
    }

    pub fn show_status(&self, message: &str) {
        self.component.send(Message::ShowStatus {
            context_id: self.component.spec.context_id.clone(),
            message: message.to_string(),
        });
    }

    /// Resize the surface and tell the controller.
    pub fn resize(&self, width: u32, height: u32) {
        if let Some(surface) = self.component.surface.as_ref() {
            surface.resize(width, height);
        }
        self.component.send(Message::ResizeComponent {
            context_id: self.component.spec.context_id.clone(),
            component_id: self.component.spec.component_id.clone(),
            width,
            height,
        });
    }

    pub fn audio(&self, command: AudioCommand, url: &str) {
        self.component.send(Message::AudioClip {
            command,
            context_id: self.component.spec.context_id.clone(),
            url: url.to_string(),
        });
    }

    pub fn open_read(&self, url: &str, kind: StreamKind) -> Result<JobReader, StreamError> {
        self.component.services.streams.open_read(url, kind)
    }

    pub fn open_write(&self, url: &str, kind: StreamKind) -> Result<JobWriter, StreamError> {
        self.component.services.streams.open_write(url, kind)
    }

    /// Ask the controller whether code signed by `signers` may use
    /// `permission`. Denies on timeout.
    pub fn request_permission(&self, signers: &[Vec<u8>], permission: &str) -> bool {
        self.component.services.permissions.check(signers, permission)
    }

    /// Make an object reachable from script.
    pub fn register_object(&self, object: GuestObject) -> ObjectHandle {
        self.component.bridge.register(object)
    }

    /// Evaluation and member access in the controller's script engine.
    pub fn scripts(&self) -> &ScriptBridge {
        &self.component.bridge
    }
}
