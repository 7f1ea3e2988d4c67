//! Simulated playback device
//!
//! Position advances with tokio time, so tests running with paused time see
//! a deterministic device. The device can be told to reject plays, stall,
//! hang or hold back its ready signal to exercise the reconciler's recovery
//! paths. Every command is recorded.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::{AudioOutput, OutputResult, ReadySignal};
use crate::content::{PlayableContent, PlaybackSource};
use crate::error::OutputError;

/// Commands received by the simulated device
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCommand {
    Load { track_id: String, generation: u64 },
    Seek(f64),
    Play,
    Pause,
    Stop,
    SetVolume(f64),
}

#[derive(Debug)]
struct SimState {
    source: Option<PlaybackSource>,
    loaded_track: Option<String>,
    pending_ready: Option<ReadySignal>,
    ready: bool,
    playing: bool,
    /// Position at `anchor`
    base_position: f64,
    anchor: Instant,
    stalled: bool,
    hanging: bool,
    auto_ready: bool,
    ready_delay: Option<Duration>,
    rejected_plays: u32,
    volume: f64,
    commands: Vec<OutputCommand>,
}

impl SimState {
    fn position(&self) -> f64 {
        if self.playing && !self.stalled {
            self.base_position + self.anchor.elapsed().as_secs_f64()
        } else {
            self.base_position
        }
    }

    fn rebase(&mut self) {
        self.base_position = self.position();
        self.anchor = Instant::now();
    }
}

/// In-process device for tests and demos
#[derive(Debug, Clone)]
pub struct SimulatedOutput {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedOutput {
    /// Device that becomes ready as soon as content is loaded
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                source: None,
                loaded_track: None,
                pending_ready: None,
                ready: false,
                playing: false,
                base_position: 0.0,
                anchor: Instant::now(),
                stalled: false,
                hanging: false,
                auto_ready: true,
                ready_delay: None,
                rejected_plays: 0,
                volume: 1.0,
                commands: Vec::new(),
            })),
        }
    }

    /// Ready signals are held until [`SimulatedOutput::fire_ready`]
    pub fn manual_ready(self) -> Self {
        self.state.lock().unwrap().auto_ready = false;
        self
    }

    /// Ready fires after `delay` of tokio time
    pub fn with_ready_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().ready_delay = Some(delay);
        self
    }

    /// Fires the pending ready signal, if any
    pub fn fire_ready(&self) -> bool {
        let signal = {
            let mut state = self.state.lock().unwrap();
            let signal = state.pending_ready.take();
            if signal.is_some() {
                state.ready = true;
                state.anchor = Instant::now();
            }
            signal
        };
        match signal {
            Some(signal) => {
                signal.notify();
                true
            }
            None => false,
        }
    }

    /// Fails the pending load, if any
    pub fn fail_load(&self, reason: &str) -> bool {
        let signal = self.state.lock().unwrap().pending_ready.take();
        match signal {
            Some(signal) => {
                signal.fail(reason);
                true
            }
            None => false,
        }
    }

    /// The next `count` play commands are rejected
    pub fn reject_next_plays(&self, count: u32) {
        self.state.lock().unwrap().rejected_plays = count;
    }

    /// A stalled device keeps "playing" without advancing
    pub fn set_stalled(&self, stalled: bool) {
        let mut state = self.state.lock().unwrap();
        state.rebase();
        state.stalled = stalled;
    }

    /// A hanging device never answers
    pub fn set_hanging(&self, hanging: bool) {
        self.state.lock().unwrap().hanging = hanging;
    }

    /// Moves the playhead behind the reconciler's back
    pub fn set_position(&self, position_secs: f64) {
        let mut state = self.state.lock().unwrap();
        state.base_position = position_secs;
        state.anchor = Instant::now();
    }

    pub fn current_position(&self) -> f64 {
        self.state.lock().unwrap().position()
    }

    pub fn playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    pub fn volume(&self) -> f64 {
        self.state.lock().unwrap().volume
    }

    pub fn loaded_track(&self) -> Option<String> {
        self.state.lock().unwrap().loaded_track.clone()
    }

    pub fn source(&self) -> Option<PlaybackSource> {
        self.state.lock().unwrap().source.clone()
    }

    pub fn commands(&self) -> Vec<OutputCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().unwrap().commands.clear();
    }

    /// Number of recorded commands matching `pred`
    pub fn count(&self, pred: impl Fn(&OutputCommand) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|c| pred(c))
            .count()
    }

    async fn gate(&self) {
        let hanging = self.state.lock().unwrap().hanging;
        if hanging {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl AudioOutput for SimulatedOutput {
    async fn load(&self, content: &PlayableContent, ready: ReadySignal) -> OutputResult<()> {
        self.gate().await;
        let (auto_ready, delay) = {
            let mut state = self.state.lock().unwrap();
            state.commands.push(OutputCommand::Load {
                track_id: content.track_id().to_string(),
                generation: content.generation(),
            });
            state.source = Some(content.source().clone());
            state.loaded_track = Some(content.track_id().to_string());
            state.ready = false;
            state.playing = false;
            state.base_position = 0.0;
            state.anchor = Instant::now();
            state.pending_ready = Some(ready);
            (state.auto_ready, state.ready_delay)
        };
        debug!(track_id = content.track_id(), source = %content.source(), "Simulated load");

        if auto_ready {
            match delay {
                None => {
                    self.fire_ready();
                }
                Some(delay) => {
                    let device = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        device.fire_ready();
                    });
                }
            }
        }
        Ok(())
    }

    async fn position(&self) -> OutputResult<f64> {
        self.gate().await;
        let state = self.state.lock().unwrap();
        if state.source.is_none() {
            return Err(OutputError::NotReady);
        }
        Ok(state.position())
    }

    async fn is_playing(&self) -> OutputResult<bool> {
        self.gate().await;
        Ok(self.state.lock().unwrap().playing)
    }

    async fn seek(&self, position_secs: f64) -> OutputResult<()> {
        self.gate().await;
        let mut state = self.state.lock().unwrap();
        state.commands.push(OutputCommand::Seek(position_secs));
        if !state.ready {
            return Err(OutputError::NotReady);
        }
        state.base_position = position_secs.max(0.0);
        state.anchor = Instant::now();
        Ok(())
    }

    async fn play(&self) -> OutputResult<()> {
        self.gate().await;
        let mut state = self.state.lock().unwrap();
        state.commands.push(OutputCommand::Play);
        if !state.ready {
            return Err(OutputError::NotReady);
        }
        if state.rejected_plays > 0 {
            state.rejected_plays -= 1;
            return Err(OutputError::PlaybackRejected(
                "autoplay blocked or interrupted".to_string(),
            ));
        }
        if !state.playing {
            state.rebase();
            state.playing = true;
        }
        Ok(())
    }

    async fn pause(&self) -> OutputResult<()> {
        self.gate().await;
        let mut state = self.state.lock().unwrap();
        state.commands.push(OutputCommand::Pause);
        state.rebase();
        state.playing = false;
        Ok(())
    }

    async fn stop(&self) -> OutputResult<()> {
        self.gate().await;
        let mut state = self.state.lock().unwrap();
        state.commands.push(OutputCommand::Stop);
        state.source = None;
        state.loaded_track = None;
        state.pending_ready = None;
        state.ready = false;
        state.playing = false;
        state.base_position = 0.0;
        state.anchor = Instant::now();
        Ok(())
    }

    async fn set_volume(&self, volume: f64) -> OutputResult<()> {
        self.gate().await;
        let mut state = self.state.lock().unwrap();
        state.commands.push(OutputCommand::SetVolume(volume));
        state.volume = volume;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputEvent;
    use tokio::sync::mpsc;

    fn content(id: &str, generation: u64) -> PlayableContent {
        PlayableContent::from_url(id, generation, format!("https://example.org/{id}.mp3"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_follows_tokio_time() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let device = SimulatedOutput::new();
        device.load(&content("a", 1), ReadySignal::new(1, tx)).await.unwrap();
        assert_eq!(rx.recv().await, Some(OutputEvent::Ready { generation: 1 }));

        device.seek(10.0).await.unwrap();
        device.play().await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!((device.position().await.unwrap() - 13.0).abs() < 1e-6);

        device.set_stalled(true);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!((device.position().await.unwrap() - 13.0).abs() < 1e-6);

        device.pause().await.unwrap();
        assert!(!device.is_playing().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_and_manual_ready() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let device = SimulatedOutput::new().manual_ready();
        device.load(&content("a", 4), ReadySignal::new(4, tx)).await.unwrap();

        // not ready yet
        assert_eq!(device.play().await, Err(OutputError::NotReady));
        assert!(device.fire_ready());
        assert_eq!(rx.recv().await, Some(OutputEvent::Ready { generation: 4 }));

        device.reject_next_plays(1);
        assert!(matches!(
            device.play().await,
            Err(OutputError::PlaybackRejected(_))
        ));
        device.play().await.unwrap();
        assert!(device.playing());
        assert_eq!(device.count(|c| *c == OutputCommand::Play), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_ready() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let device = SimulatedOutput::new().with_ready_delay(Duration::from_millis(700));
        device.load(&content("a", 2), ReadySignal::new(2, tx)).await.unwrap();
        let start = Instant::now();
        assert_eq!(rx.recv().await, Some(OutputEvent::Ready { generation: 2 }));
        assert!(start.elapsed() >= Duration::from_millis(700));
    }
}
