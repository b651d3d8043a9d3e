//! Version information for hostlet.

/// Hostlet version from Cargo.toml
pub const HOSTLET_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Highest command code this build understands.
pub const PROTOCOL_MAX_CODE: u8 = 29;

/// Startup banner, logged as one structured record.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub hostlet: &'static str,
    pub protocol_max_code: u8,
    /// Classes served by the built-in loader.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub native_classes: Vec<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            hostlet: HOSTLET_VERSION,
            protocol_max_code: PROTOCOL_MAX_CODE,
            native_classes: Vec::new(),
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_native_classes(mut self, classes: Vec<String>) -> Self {
        self.native_classes = classes;
        self
    }
}
