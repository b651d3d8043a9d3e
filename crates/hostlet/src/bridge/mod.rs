//! Wire layer between the controller and the host.
//!
//! - **codec**: length-prefixed, NUL-delimited frames
//! - **protocol**: typed commands (inbound) and messages (outbound)
//! - **transport**: outbound queue and the single writer task

pub mod codec;
pub mod protocol;
pub mod transport;
