//! Playback reconciler
//!
//! Keeps a local [`AudioOutput`] aligned with the clock-derived target.
//!
//! ```text
//!            first target            ready                 play accepted
//!   Idle ───────────────▶ Loading ─────────▶ Syncing ───────────────▶ Playing
//!    ▲                      │  │  ready + mute   ▲  │ mute                │
//!    │ no target            │  └──────────────▶ Muted ◀─────────────────┘
//!    └──────────────────────┘                  unmute ─▶ Syncing
//!        any state ── target track or its content changes ──▶ Loading
//! ```
//!
//! Each selected track gets a new generation number. Content fetches and
//! device ready signals carry the generation they were issued for; anything
//! older than the current generation is discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pmorotation::{Target, Track};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{clamp_volume, OnAirConfig};
use crate::content::PlayableContent;
use crate::error::OutputError;
use crate::output::{AudioOutput, OutputEvent, OutputResult, ReadySignal};

/// Playback lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcilerState {
    #[default]
    Idle,
    Loading,
    Syncing,
    Playing,
    Muted,
}

impl ReconcilerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilerState::Idle => "idle",
            ReconcilerState::Loading => "loading",
            ReconcilerState::Syncing => "syncing",
            ReconcilerState::Playing => "playing",
            ReconcilerState::Muted => "muted",
        }
    }
}

impl std::fmt::Display for ReconcilerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drift correction tuning
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerSettings {
    pub drift_tolerance_secs: f64,
    pub reseek_after_ticks: u32,
    pub device_timeout: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from(&OnAirConfig::default())
    }
}

impl From<&OnAirConfig> for ReconcilerSettings {
    fn from(config: &OnAirConfig) -> Self {
        Self {
            drift_tolerance_secs: config.drift_tolerance_secs,
            reseek_after_ticks: config.reseek_after_ticks.max(1),
            device_timeout: config.device_timeout(),
        }
    }
}

/// Counters, mostly for tests and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub loads: u64,
    pub seeks: u64,
    pub play_rejections: u64,
    pub device_timeouts: u64,
    pub device_errors: u64,
    pub stale_fetches: u64,
    pub stale_events: u64,
    pub missing_content: u64,
}

/// Content fetch to start for a newly selected track
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub generation: u64,
    pub track: Track,
}

/// What one drift tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// `position - target`, when the device answered
    pub drift_secs: Option<f64>,
    pub seeked: bool,
    pub play_attempted: bool,
}

pub struct PlaybackReconciler {
    output: Arc<dyn AudioOutput>,
    settings: ReconcilerSettings,
    events: mpsc::UnboundedSender<OutputEvent>,
    state: ReconcilerState,
    generation: u64,
    track_id: Option<String>,
    /// URL of the selected track when it was selected
    content_url: Option<String>,
    /// Stored bytes of the current track changed since it was fetched
    content_changed: bool,
    content: Option<PlayableContent>,
    /// Content accepted but `load` failed on the device; retried on tick
    load_pending: bool,
    deferred_seek: Option<f64>,
    /// Drift ticks since the last corrective seek, while drift persists
    ticks_since_seek: Option<u32>,
    muted: bool,
    volume: f64,
    stats: ReconcilerStats,
}

impl PlaybackReconciler {
    /// `events` is the channel the device's ready signals are sent to.
    pub fn new(
        output: Arc<dyn AudioOutput>,
        settings: ReconcilerSettings,
        events: mpsc::UnboundedSender<OutputEvent>,
        muted: bool,
        volume: f64,
    ) -> Self {
        Self {
            output,
            settings,
            events,
            state: ReconcilerState::Idle,
            generation: 0,
            track_id: None,
            content_url: None,
            content_changed: false,
            content: None,
            load_pending: false,
            deferred_seek: None,
            ticks_since_seek: None,
            muted,
            volume: clamp_volume(volume),
            stats: ReconcilerStats::default(),
        }
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current_track_id(&self) -> Option<&str> {
        self.track_id.as_deref()
    }

    pub fn content(&self) -> Option<&PlayableContent> {
        self.content.as_ref()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.stats
    }

    /// Follows a new resolution result.
    ///
    /// Returns the fetch to start when the target track changed.
    pub async fn select(
        &mut self,
        target: Option<&Target>,
        track: Option<&Track>,
    ) -> Option<FetchRequest> {
        let (Some(target), Some(track)) = (target, track) else {
            self.go_idle().await;
            return None;
        };

        let same_track = self.track_id.as_deref() == Some(target.track_id.as_str());
        let same_content =
            self.content_url.as_deref() == Some(track.url.as_str()) && !self.content_changed;
        if same_track && same_content {
            return None;
        }

        if self.content.is_some() {
            let _ = self.device(|o| async move { o.stop().await }).await;
        }
        self.generation += 1;
        self.track_id = Some(target.track_id.clone());
        self.content_url = Some(track.url.clone());
        self.content_changed = false;
        self.drop_content().await;
        self.load_pending = false;
        self.deferred_seek = None;
        self.ticks_since_seek = None;
        self.state = ReconcilerState::Loading;

        if same_track {
            info!(
                track_id = %target.track_id,
                generation = self.generation,
                "Content of the on-air track changed, reloading"
            );
        } else {
            info!(
                track_id = %target.track_id,
                generation = self.generation,
                source = %target.source,
                "On-air track changed"
            );
        }

        Some(FetchRequest {
            generation: self.generation,
            track: track.clone(),
        })
    }

    /// Flags new stored bytes for `track_id`; the next [`select`] of that
    /// track reloads it. Returns whether it is the current track.
    ///
    /// [`select`]: PlaybackReconciler::select
    pub fn mark_content_changed(&mut self, track_id: &str) -> bool {
        let current = self.track_id.as_deref() == Some(track_id);
        if current {
            self.content_changed = true;
        }
        current
    }

    /// Accepts the outcome of a content fetch.
    ///
    /// Stale content is dropped, which releases any local file it owns.
    pub async fn on_content(&mut self, generation: u64, content: Option<PlayableContent>) {
        if generation != self.generation || self.state == ReconcilerState::Idle {
            self.stats.stale_fetches += 1;
            debug!(generation, current = self.generation, "Discarding stale content fetch");
            if let Some(content) = content {
                content.release().await;
            }
            return;
        }

        let Some(content) = content else {
            self.stats.missing_content += 1;
            info!(
                track_id = ?self.track_id,
                generation,
                "No content available, staying silent for this track"
            );
            return;
        };

        self.content = Some(content);
        self.load_current().await;
    }

    /// Handles a device event.
    ///
    /// `fresh_offset` is the target offset recomputed for the current track
    /// at the time the event is processed.
    pub async fn on_output_event(&mut self, event: OutputEvent, fresh_offset: Option<f64>) {
        if event.generation() != self.generation || self.state != ReconcilerState::Loading {
            self.stats.stale_events += 1;
            debug!(
                generation = event.generation(),
                current = self.generation,
                state = %self.state,
                "Discarding stale device event"
            );
            return;
        }

        match event {
            OutputEvent::Ready { generation } => {
                debug!(generation, "Content ready");
                self.apply_volume().await;
                if self.muted {
                    self.deferred_seek = None;
                    self.state = ReconcilerState::Muted;
                    return;
                }

                self.state = ReconcilerState::Syncing;
                let deferred = self.deferred_seek.take();
                if let Some(offset) = fresh_offset.or(deferred) {
                    self.seek_to(offset).await;
                }
                // initial positioning, not a drift correction
                self.ticks_since_seek = None;
                self.ensure_playing().await;
            }
            OutputEvent::LoadFailed { generation, reason } => {
                self.stats.device_errors += 1;
                warn!(generation, reason = %reason, "Device failed to load content, staying silent");
                self.drop_content().await;
            }
        }
    }

    /// Drift tick: converges the device towards `target`.
    pub async fn reconcile(&mut self, target: &Target) -> TickReport {
        let mut report = TickReport::default();
        if self.track_id.as_deref() != Some(target.track_id.as_str()) {
            return report;
        }

        match self.state {
            ReconcilerState::Idle | ReconcilerState::Muted => {}
            ReconcilerState::Loading => {
                if self.load_pending {
                    self.load_current().await;
                }
                if self.content.is_some() {
                    self.deferred_seek = Some(target.offset_secs);
                }
            }
            ReconcilerState::Syncing | ReconcilerState::Playing => {
                let position = match self.device(|o| async move { o.position().await }).await {
                    Ok(position) => position,
                    Err(_) => return report,
                };

                let drift = position - target.offset_secs;
                report.drift_secs = Some(drift);

                if drift.abs() > self.settings.drift_tolerance_secs {
                    let due = match self.ticks_since_seek {
                        None => true,
                        Some(ticks) => {
                            let ticks = ticks + 1;
                            self.ticks_since_seek = Some(ticks);
                            ticks >= self.settings.reseek_after_ticks
                        }
                    };
                    if due {
                        debug!(
                            track_id = %target.track_id,
                            drift,
                            "Drift out of tolerance, seeking"
                        );
                        report.seeked = self.seek_to(target.offset_secs).await;
                    }
                } else {
                    self.ticks_since_seek = None;
                }

                report.play_attempted = self.ensure_playing().await;
            }
        }
        report
    }

    /// Mutes or unmutes. Muting pauses the device and never seeks.
    pub async fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            return;
        }
        self.muted = muted;

        match (muted, self.state) {
            (true, ReconcilerState::Syncing | ReconcilerState::Playing) => {
                let _ = self.device(|o| async move { o.pause().await }).await;
                self.state = ReconcilerState::Muted;
                info!("Muted");
            }
            (false, ReconcilerState::Muted) => {
                self.ticks_since_seek = None;
                self.state = ReconcilerState::Syncing;
                info!("Unmuted");
            }
            // Loading keeps the pending mute for the ready signal
            _ => debug!(muted, state = %self.state, "Mute flag updated"),
        }
    }

    /// Applies a volume change whatever the state.
    pub async fn set_volume(&mut self, volume: f64) {
        self.volume = clamp_volume(volume);
        self.apply_volume().await;
    }

    /// Stops the device and forgets the current track.
    pub async fn go_idle(&mut self) {
        if self.state == ReconcilerState::Idle && self.track_id.is_none() {
            return;
        }
        info!(generation = self.generation, "Nothing on air, going idle");
        self.release().await;
    }

    /// Final teardown
    pub async fn shutdown(&mut self) {
        self.release().await;
        debug!(stats = ?self.stats, "Reconciler stopped");
    }

    async fn release(&mut self) {
        let _ = self.device(|o| async move { o.stop().await }).await;
        self.generation += 1;
        self.track_id = None;
        self.content_url = None;
        self.content_changed = false;
        self.drop_content().await;
        self.load_pending = false;
        self.deferred_seek = None;
        self.ticks_since_seek = None;
        self.state = ReconcilerState::Idle;
    }

    async fn drop_content(&mut self) {
        if let Some(content) = self.content.take() {
            content.release().await;
        }
    }

    async fn load_current(&mut self) {
        let Some(content) = self.content.as_ref() else {
            return;
        };
        let ready = ReadySignal::new(self.generation, self.events.clone());
        let output = Arc::clone(&self.output);
        let timeout = self.settings.device_timeout;
        let result = bounded(timeout, output.load(content, ready)).await;
        match result {
            Ok(()) => {
                self.stats.loads += 1;
                self.load_pending = false;
            }
            Err(e) => {
                self.note_failure("load", &e);
                self.load_pending = true;
            }
        }
    }

    async fn seek_to(&mut self, offset_secs: f64) -> bool {
        let position = offset_secs.max(0.0);
        let ok = self
            .device(|o| async move { o.seek(position).await })
            .await
            .is_ok();
        if ok {
            self.stats.seeks += 1;
            self.ticks_since_seek = Some(0);
        }
        ok
    }

    /// Issues play when the device is not playing; returns whether play was
    /// attempted.
    async fn ensure_playing(&mut self) -> bool {
        let playing = matches!(
            self.device(|o| async move { o.is_playing().await }).await,
            Ok(true)
        );
        if playing {
            self.state = ReconcilerState::Playing;
            return false;
        }

        match self.device(|o| async move { o.play().await }).await {
            Ok(()) => {
                if self.state != ReconcilerState::Playing {
                    info!(track_id = ?self.track_id, "Playback started");
                }
                self.state = ReconcilerState::Playing;
            }
            Err(_) => self.state = ReconcilerState::Syncing,
        }
        true
    }

    async fn apply_volume(&mut self) {
        let volume = self.volume;
        let _ = self
            .device(|o| async move { o.set_volume(volume).await })
            .await;
    }

    /// Runs one device call bounded by the device timeout, recording failures.
    async fn device<T, F, Fut>(&mut self, call: F) -> OutputResult<T>
    where
        F: FnOnce(Arc<dyn AudioOutput>) -> Fut,
        Fut: Future<Output = OutputResult<T>>,
    {
        let output = Arc::clone(&self.output);
        let result = bounded(self.settings.device_timeout, call(output)).await;
        if let Err(e) = &result {
            self.note_failure("device call", e);
        }
        result
    }

    fn note_failure(&mut self, op: &str, err: &OutputError) {
        match err {
            OutputError::PlaybackRejected(reason) => {
                self.stats.play_rejections += 1;
                warn!(reason = %reason, "Playback rejected, retrying on next tick");
            }
            OutputError::Timeout(after) => {
                self.stats.device_timeouts += 1;
                warn!(op, after = ?after, "Device did not answer in time");
            }
            OutputError::NotReady => debug!(op, "Device not ready"),
            OutputError::Device(msg) => {
                self.stats.device_errors += 1;
                warn!(op, error = %msg, "Device error");
            }
        }
    }
}

async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = OutputResult<T>>,
) -> OutputResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(OutputError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{OutputCommand, SimulatedOutput};
    use pmorotation::TargetSource;

    struct Harness {
        device: SimulatedOutput,
        reconciler: PlaybackReconciler,
        events: mpsc::UnboundedReceiver<OutputEvent>,
    }

    fn harness(device: SimulatedOutput, muted: bool) -> Harness {
        let (tx, events) = mpsc::unbounded_channel();
        let reconciler = PlaybackReconciler::new(
            Arc::new(device.clone()),
            ReconcilerSettings::default(),
            tx,
            muted,
            0.8,
        );
        Harness {
            device,
            reconciler,
            events,
        }
    }

    fn target(id: &str, offset: f64) -> Target {
        Target {
            track_id: id.to_string(),
            offset_secs: offset,
            source: TargetSource::Rotation,
        }
    }

    fn track(id: &str) -> Track {
        Track::new(id, id, "X", 300.0).with_url(format!("https://example.org/{id}.mp3"))
    }

    impl Harness {
        /// Selects `id`, feeds URL content and processes the ready signal.
        async fn start(&mut self, id: &str, offset: f64) {
            let request = self
                .reconciler
                .select(Some(&target(id, offset)), Some(&track(id)))
                .await
                .unwrap();
            let content = PlayableContent::from_url(id, request.generation, "u");
            self.reconciler.on_content(request.generation, Some(content)).await;
            let event = self.events.try_recv().unwrap();
            self.reconciler.on_output_event(event, Some(offset)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_reaches_playing() {
        let mut h = harness(SimulatedOutput::new(), false);
        assert_eq!(h.reconciler.state(), ReconcilerState::Idle);
        h.start("a", 42.0).await;

        assert_eq!(h.reconciler.state(), ReconcilerState::Playing);
        assert!(h.device.playing());
        assert!((h.device.current_position() - 42.0).abs() < 1e-6);
        assert_eq!(h.device.volume(), 0.8);
        assert_eq!(h.reconciler.stats().seeks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_drift_is_left_alone() {
        let mut h = harness(SimulatedOutput::new(), false);
        h.start("a", 10.0).await;
        h.device.set_position(11.0);
        let report = h.reconciler.reconcile(&target("a", 10.0)).await;
        assert!(!report.seeked);
        assert_eq!(h.reconciler.stats().seeks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_correction_is_edge_triggered() {
        let mut h = harness(SimulatedOutput::new(), false);
        h.start("a", 10.0).await;
        // the device keeps ignoring seeks: simulate by stalling far behind
        h.device.set_position(2.0);
        h.device.set_stalled(true);

        let first = h.reconciler.reconcile(&target("a", 10.0)).await;
        assert!(first.seeked);
        h.device.set_position(2.0);

        // no new seek while the excess persists...
        for _ in 0..3 {
            let r = h.reconciler.reconcile(&target("a", 10.0)).await;
            assert!(!r.seeked);
            h.device.set_position(2.0);
        }
        // ...until the grace period ends
        let again = h.reconciler.reconcile(&target("a", 10.0)).await;
        assert!(again.seeked);
        assert_eq!(h.reconciler.stats().seeks, 3);

        // back within tolerance re-arms the trigger
        h.device.set_position(10.0);
        assert!(!h.reconciler.reconcile(&target("a", 10.0)).await.seeked);
        h.device.set_position(0.0);
        assert!(h.reconciler.reconcile(&target("a", 10.0)).await.seeked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_target_seeks_to_zero() {
        let mut h = harness(SimulatedOutput::new(), false);
        h.start("a", -30.0).await;
        let first_seek = h
            .device
            .commands()
            .into_iter()
            .find(|c| matches!(c, OutputCommand::Seek(_)));
        assert_eq!(first_seek, Some(OutputCommand::Seek(0.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_rejection_is_soft_and_retried() {
        let device = SimulatedOutput::new();
        device.reject_next_plays(1);
        let mut h = harness(device, false);
        h.start("a", 5.0).await;

        assert_eq!(h.reconciler.state(), ReconcilerState::Syncing);
        assert_eq!(h.reconciler.stats().play_rejections, 1);

        let report = h.reconciler.reconcile(&target("a", 5.0)).await;
        assert!(report.play_attempted);
        assert_eq!(h.reconciler.state(), ReconcilerState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_pauses_without_seeking() {
        let mut h = harness(SimulatedOutput::new(), false);
        h.start("a", 5.0).await;
        h.device.clear_commands();

        h.reconciler.set_muted(true).await;
        assert_eq!(h.reconciler.state(), ReconcilerState::Muted);
        // drift ticks while muted do nothing
        h.device.set_position(100.0);
        h.reconciler.reconcile(&target("a", 5.0)).await;

        assert_eq!(h.device.commands(), vec![OutputCommand::Pause]);

        h.reconciler.set_muted(false).await;
        assert_eq!(h.reconciler.state(), ReconcilerState::Syncing);
        let report = h.reconciler.reconcile(&target("a", 5.0)).await;
        assert!(report.seeked);
        assert_eq!(h.reconciler.state(), ReconcilerState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_pending_during_loading() {
        let mut h = harness(SimulatedOutput::new(), true);
        h.start("a", 5.0).await;
        assert_eq!(h.reconciler.state(), ReconcilerState::Muted);
        assert!(!h.device.playing());
        assert_eq!(h.device.count(|c| matches!(c, OutputCommand::Seek(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_requested_while_loading_applied_once_on_ready() {
        let mut h = harness(SimulatedOutput::new().manual_ready(), false);
        let request = h
            .reconciler
            .select(Some(&target("a", 3.0)), Some(&track("a")))
            .await
            .unwrap();
        h.reconciler
            .on_content(request.generation, Some(PlayableContent::from_url("a", request.generation, "u")))
            .await;

        // two drift ticks while loading
        h.reconciler.reconcile(&target("a", 3.0)).await;
        h.reconciler.reconcile(&target("a", 3.5)).await;
        assert_eq!(h.reconciler.state(), ReconcilerState::Loading);
        assert_eq!(h.device.count(|c| matches!(c, OutputCommand::Seek(_))), 0);

        h.device.fire_ready();
        let event = h.events.try_recv().unwrap();
        h.reconciler.on_output_event(event, None).await;

        assert_eq!(h.device.count(|c| matches!(c, OutputCommand::Seek(_))), 1);
        assert!((h.device.current_position() - 3.5).abs() < 1e-6);
        assert_eq!(h.reconciler.state(), ReconcilerState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fetch_and_ready_are_discarded() {
        let mut h = harness(SimulatedOutput::new().manual_ready(), false);
        let first = h
            .reconciler
            .select(Some(&target("a", 0.0)), Some(&track("a")))
            .await
            .unwrap();
        h.reconciler
            .on_content(first.generation, Some(PlayableContent::from_url("a", first.generation, "u")))
            .await;

        let second = h
            .reconciler
            .select(Some(&target("b", 0.0)), Some(&track("b")))
            .await
            .unwrap();
        assert!(second.generation > first.generation);

        // late ready for "a"
        h.reconciler
            .on_output_event(OutputEvent::Ready { generation: first.generation }, Some(0.0))
            .await;
        // late fetch for "a"
        h.reconciler
            .on_content(first.generation, Some(PlayableContent::from_url("a", first.generation, "u")))
            .await;

        assert!(h.reconciler.content().is_none());
        assert_eq!(h.reconciler.state(), ReconcilerState::Loading);
        assert_eq!(h.reconciler.stats().stale_fetches, 1);
        assert_eq!(h.reconciler.stats().stale_events, 1);
        assert_eq!(h.device.loaded_track(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_content_is_a_silent_gap() {
        let mut h = harness(SimulatedOutput::new(), false);
        let request = h
            .reconciler
            .select(Some(&target("a", 0.0)), Some(&track("a")))
            .await
            .unwrap();
        h.reconciler.on_content(request.generation, None).await;
        h.reconciler.reconcile(&target("a", 1.0)).await;

        assert_eq!(h.reconciler.state(), ReconcilerState::Loading);
        assert_eq!(h.reconciler.stats().missing_content, 1);
        assert!(h.device.commands().is_empty());

        // same track again does not refetch
        assert!(h
            .reconciler
            .select(Some(&target("a", 2.0)), Some(&track("a")))
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_url_reloads_same_track() {
        let mut h = harness(SimulatedOutput::new(), false);
        h.start("a", 5.0).await;
        let first = h.reconciler.generation();

        // same id, same URL: nothing to do
        assert!(h
            .reconciler
            .select(Some(&target("a", 6.0)), Some(&track("a")))
            .await
            .is_none());

        let moved = track("a").with_url("https://cdn.example.org/a-v2.mp3");
        let request = h
            .reconciler
            .select(Some(&target("a", 6.0)), Some(&moved))
            .await
            .unwrap();
        assert_eq!(request.generation, first + 1);
        assert_eq!(request.track.url, "https://cdn.example.org/a-v2.mp3");
        assert_eq!(h.reconciler.state(), ReconcilerState::Loading);
        assert_eq!(h.device.commands().last(), Some(&OutputCommand::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_stored_bytes_end_silent_gap() {
        let mut h = harness(SimulatedOutput::new(), false);
        let request = h
            .reconciler
            .select(Some(&target("a", 0.0)), Some(&track("a")))
            .await
            .unwrap();
        h.reconciler.on_content(request.generation, None).await;

        assert!(!h.reconciler.mark_content_changed("other"));
        assert!(h.reconciler.mark_content_changed("a"));
        let retry = h
            .reconciler
            .select(Some(&target("a", 1.0)), Some(&track("a")))
            .await
            .unwrap();
        assert_eq!(retry.generation, request.generation + 1);

        // the flag is consumed by the reload
        assert!(h
            .reconciler
            .select(Some(&target("a", 2.0)), Some(&track("a")))
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_target_goes_idle() {
        let mut h = harness(SimulatedOutput::new(), false);
        h.start("a", 0.0).await;
        assert!(h.reconciler.select(None, None).await.is_none());
        assert_eq!(h.reconciler.state(), ReconcilerState::Idle);
        assert!(!h.device.playing());
        assert_eq!(h.reconciler.current_track_id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_is_applied_in_any_state() {
        let mut h = harness(SimulatedOutput::new(), true);
        h.reconciler.set_volume(0.3).await;
        assert_eq!(h.device.volume(), 0.3);
        h.reconciler.set_volume(4.0).await;
        assert_eq!(h.reconciler.volume(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_device_times_out() {
        let mut h = harness(SimulatedOutput::new(), false);
        h.start("a", 0.0).await;
        h.device.set_hanging(true);

        let report = h.reconciler.reconcile(&target("a", 0.0)).await;
        assert_eq!(report.drift_secs, None);
        assert_eq!(h.reconciler.stats().device_timeouts, 1);
        assert_eq!(h.reconciler.state(), ReconcilerState::Playing);
    }
}
