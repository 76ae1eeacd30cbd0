//! # xstream
//!
//! Xbox game streaming session negotiation: the [`Coordinator`] ties the Xbox Live
//! authentication chain from `xs-auth` to the gssv streaming clients of `xs-stream`.

pub mod coordinator;
pub mod events;
pub mod host;

#[cfg(test)]
mod testing;

pub use coordinator::{Coordinator, PlayerState, PlayerStatus};
pub use events::AuthSink;
pub use host::ConsoleSurface;
