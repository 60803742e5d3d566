//! Provider registry: recognizing video URLs and resolving them into
//! downloadable sources.
//!
//! A [`Provider`] matches any URL it knows how to handle, producing a
//! [`Source`]; reconnaissance turns that into a [`ResolvedSource`] that can
//! fetch actual bytes through a [`transfer::Transfer`] sink. The
//! [`ProviderRegistry`] tries providers in priority order.

mod error;
pub mod raw;
mod registry;
mod source;
mod utils;

pub use error::ProviderError;
pub use registry::{Match, MatchFn, Provider, ProviderRegistry, PRIORITY_DEFAULT, PRIORITY_HIGHEST, PRIORITY_LOWEST};
pub use source::{ResolvedSource, Source, SourceInfo};
pub use utils::filename_from_url;
