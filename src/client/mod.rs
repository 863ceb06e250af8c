//! Consumer side of the event streams.
//!
//! - [`StreamSource`] - opens a stream (over HTTP via [`HttpSource`], or anything yielding lines)
//! - [`StreamHandle`] - one cancellable stream and its [`Projection`]
//! - [`StreamCoordinator`] - one live stream per [`Intent`], last request wins

pub mod consumer;
pub mod coordinator;
pub mod source;
#[cfg(test)]
pub(crate) mod testing;

pub use consumer::{Observer, Phase, Projection, StreamHandle};
pub use coordinator::StreamCoordinator;
pub use source::{HttpSource, Intent, StreamRequest, StreamSource};
