//! Multi-source video archival core.
//!
//! A [`Session`] manages a fleet of independent [`Download`] state machines,
//! each progressing through a pipeline of stages (match → resolve → fetch
//! bytes) under a per-download command loop, with every lifecycle and state
//! change published on a single aggregated event stream.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use varchive::{DownloadEvent, DownloadStage, Session, SessionConfig};
//!
//! # async fn demo() -> varchive::Result<()> {
//! let mut registry = providers::ProviderRegistry::new();
//! registry.add(providers::raw::RawConfig::default().provider())?;
//!
//! let config = SessionConfig::new()
//!     .with_registry(Arc::new(registry))
//!     .with_default_save_path("videos");
//! let session = Session::new(config, &CancellationToken::new());
//!
//! let events = session.subscribe().await?;
//! let download = session
//!     .add_download("https://host/clip.mp4", Default::default())
//!     .await?;
//! download.start(DownloadStage::Downloaded).await;
//!
//! while let Some(event) = events.recv().await {
//!     if let DownloadEvent::Stopped { download, error } = event {
//!         println!("{:?} finished: {:?}", download.id(), error);
//!         break;
//!     }
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod download;
mod error;
pub mod logging;
pub mod session;
pub mod store;

pub use config::SessionConfig;
pub use download::{
    Download, DownloadId, DownloadStage, DownloadState, DownloadStatus, EphemeralState,
    PersistentState,
};
pub use error::{Error, Result};
pub use session::{AddDownloadOptions, DownloadEvent, Session};
