//! Interfaces to the guest runtime.
//!
//! The bridge does not execute guest code itself. A [`GuestLoader`] resolves
//! a component's class, a [`GuestClass`] constructs instances, and a
//! [`GuestInstance`] receives the lifecycle hooks. Presentation is optional
//! and goes through [`PresentationSurface`].

use std::sync::Arc;

use crate::component::{ComponentHost, ComponentSpec};
use crate::scripting::GuestObject;

#[derive(Debug, thiserror::Error)]
pub enum GuestError {
    #[error("failed to load {class}: {message}")]
    Load { class: String, message: String },

    #[error("failed to instantiate {class}: {message}")]
    Instantiate { class: String, message: String },

    #[error("{hook} hook failed: {message}")]
    Hook { hook: &'static str, message: String },
}

impl GuestError {
    pub fn load(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            class: class.into(),
            message: message.into(),
        }
    }

    pub fn instantiate(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Instantiate {
            class: class.into(),
            message: message.into(),
        }
    }

    pub fn hook(hook: &'static str, message: impl Into<String>) -> Self {
        Self::Hook {
            hook,
            message: message.into(),
        }
    }
}

/// Resolves component classes. Shared by every component in the process.
pub trait GuestLoader: Send + Sync {
    /// Load the class named by `spec`. Runs on the component's worker.
    fn load(&self, spec: &ComponentSpec) -> Result<Box<dyn GuestClass>, GuestError>;

    /// Presentation surface for a component, if this runtime draws one.
    fn surface(&self, _spec: &ComponentSpec) -> Option<Arc<dyn PresentationSurface>> {
        None
    }
}

/// A loaded class, able to construct instances.
pub trait GuestClass: Send {
    fn instantiate(&self, host: ComponentHost) -> Result<Box<dyn GuestInstance>, GuestError>;
}

/// A live guest instance. Hooks run on the component's worker thread.
pub trait GuestInstance: Send {
    fn init(&mut self) -> Result<(), GuestError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), GuestError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), GuestError> {
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), GuestError> {
        Ok(())
    }

    /// Object the controller addresses as handle 0.
    fn scriptable(&self) -> Option<GuestObject> {
        None
    }
}

/// Where a component is drawn.
pub trait PresentationSurface: Send + Sync {
    fn show(&self);
    fn hide(&self);
    fn resize(&self, width: u32, height: u32);
    fn dispose(&self);
}

/// Debug console opened by `ShowConsole`.
pub trait ConsoleSurface: Send + Sync {
    fn show(&self);
}
