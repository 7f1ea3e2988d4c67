//! # pmoonair
//!
//! Synchronized live radio playback.
//!
//! Every listener resolves the same on-air track and offset from the shared
//! epoch (see `pmorotation`). This crate keeps a local audio output aligned
//! with that target:
//!
//! - [`engine`]: the task that runs the rotation and drift timers, owns the
//!   station state and publishes [`OnAirSnapshot`]s
//! - [`reconciler`]: the playback state machine with drift correction
//! - [`content`] and [`blob`]: turning catalog tracks into playable content,
//!   with cancellation of superseded fetches
//! - [`store`]: the persisted station document
//! - [`output`]: the device boundary and an in-process simulated device
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pmoonair::{OnAirEngine, SimulatedOutput};
//! use pmorotation::{Catalog, Track};
//!
//! # async fn run() -> pmoonair::Result<()> {
//! let output = Arc::new(SimulatedOutput::new());
//! let engine = OnAirEngine::builder(output)
//!     .catalog(Catalog::from_tracks(vec![
//!         Track::new("a", "Alpha", "X", 100.0).with_url("http://radio.local/a.mp3"),
//!     ]))
//!     .spawn();
//!
//! engine.unmute().await?;
//! println!("{:?}", engine.snapshot().now_playing());
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod clock;
pub mod config;
pub mod config_ext;
pub mod content;
pub mod engine;
pub mod error;
pub mod output;
pub mod reconciler;
pub mod snapshot;
pub mod store;

pub use blob::{BlobStore, MemoryBlobStore, SqliteBlobStore, StoredBlob};
pub use clock::TokioClock;
pub use config::OnAirConfig;
pub use config_ext::OnAirConfigExt;
pub use content::{ContentLoader, PlayableContent, PlaybackSource};
pub use engine::{EngineBuilder, EngineCommand, OnAirEngine};
pub use error::{Error, OutputError, Result};
pub use output::{AudioOutput, OutputCommand, OutputEvent, ReadySignal, SimulatedOutput};
pub use reconciler::{PlaybackReconciler, ReconcilerSettings, ReconcilerState, ReconcilerStats};
pub use snapshot::{NowPlaying, OnAirSnapshot};
pub use store::StationStore;
