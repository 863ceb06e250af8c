//! Playlist synthesis against an external music catalog.
//!
//! - [`catalog`] - the [`Catalog`] seam and its error type
//! - [`spotify`] - Spotify Web API implementation
//! - [`synthesizer`] - the collect / resolve / add pipeline

pub mod catalog;
pub mod spotify;
pub mod synthesizer;

pub use catalog::{Catalog, CatalogError, CatalogPlaylist, CatalogTrack};
pub use spotify::SpotifyCatalog;
pub use synthesizer::{ProgressSink, SynthesisError, Synthesizer};
