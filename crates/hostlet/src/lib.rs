//! hostlet: host-side bridge that runs guest components for a controlling
//! browser engine over a framed stdin/stdout protocol.

mod lock;

pub mod bridge;
pub mod builtin;
pub mod component;
pub mod config;
pub mod dispatch;
pub mod guest;
pub mod permission;
pub mod registry;
pub mod scripting;
pub mod server;
pub mod services;
pub mod stream;
pub mod supervisor;
mod version;

pub use bridge::codec::{Frame, FrameCodec, FrameError};
pub use bridge::protocol::{Command, CommandCode, Message, ProtocolError};
pub use builtin::{ECHO_CLASS, NativeLoader};
pub use component::{Component, ComponentHost, ComponentSpec, LifecycleState};
pub use config::{BridgeConfig, ConfigError};
pub use dispatch::{DispatchError, Dispatcher, Flow};
pub use guest::{
    ConsoleSurface, GuestClass, GuestError, GuestInstance, GuestLoader, PresentationSurface,
};
pub use permission::{Decision, PermissionBroker};
pub use server::{ServerError, ServerExit, run_server};
pub use stream::{JobReader, JobWriter, StreamError, StreamJobManager, StreamKind};
pub use version::{HOSTLET_VERSION, VersionInfo};
