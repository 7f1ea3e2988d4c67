//! Audio output boundary
//!
//! The reconciler drives a playback device through [`AudioOutput`]. Real
//! devices lag, stall and refuse to start, so every operation can fail and
//! the reconciler bounds each call with a timeout.
//!
//! Loading is asynchronous: [`AudioOutput::load`] returns once the device has
//! accepted the source, and the device later fires the [`ReadySignal`] it was
//! handed when enough data is buffered to seek and play.

pub mod simulated;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::content::PlayableContent;
use crate::error::OutputError;

pub use simulated::{OutputCommand, SimulatedOutput};

/// Result alias for device operations
pub type OutputResult<T> = std::result::Result<T, OutputError>;

/// Events a device reports back to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// Content of `generation` is ready to seek and play
    Ready { generation: u64 },
    /// Content of `generation` could not be decoded or opened
    LoadFailed { generation: u64, reason: String },
}

impl OutputEvent {
    pub fn generation(&self) -> u64 {
        match self {
            OutputEvent::Ready { generation } | OutputEvent::LoadFailed { generation, .. } => {
                *generation
            }
        }
    }
}

/// One-shot notifier handed to the device with each load
///
/// The generation tag lets the reconciler recognise signals fired for
/// content that has since been replaced.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    generation: u64,
    tx: mpsc::UnboundedSender<OutputEvent>,
}

impl ReadySignal {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<OutputEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports the content as playable
    pub fn notify(&self) {
        // the engine may already be gone
        let _ = self.tx.send(OutputEvent::Ready {
            generation: self.generation,
        });
    }

    /// Reports a load failure
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.tx.send(OutputEvent::LoadFailed {
            generation: self.generation,
            reason: reason.into(),
        });
    }
}

/// A local playback device
///
/// Positions are in seconds from the start of the loaded content; volume is a
/// linear gain in `0.0..=1.0`.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Replaces the current source; playback stops until `play`.
    async fn load(&self, content: &PlayableContent, ready: ReadySignal) -> OutputResult<()>;

    /// Current playback position
    async fn position(&self) -> OutputResult<f64>;

    async fn is_playing(&self) -> OutputResult<bool>;

    async fn seek(&self, position_secs: f64) -> OutputResult<()>;

    /// Starts or resumes playback; may be rejected by the platform.
    async fn play(&self) -> OutputResult<()>;

    async fn pause(&self) -> OutputResult<()>;

    /// Stops playback and releases the current source
    async fn stop(&self) -> OutputResult<()>;

    async fn set_volume(&self, volume: f64) -> OutputResult<()>;
}
