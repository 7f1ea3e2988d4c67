//! On-air engine
//!
//! A single task owns the catalog, the schedule, the epoch and the
//! reconciler. It multiplexes two periodic timers (rotation and drift), the
//! completions of background content fetches, device events and external
//! commands. Nothing is shared with other tasks except through channels, so
//! no lock protects the rotation state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pmorotation::{
    epoch_for_direct_play, resolve_all, Catalog, Clock, Resolution, ScheduleTable,
    StationDocument, SystemClock, Track,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blob::StoredBlob;
use crate::config::OnAirConfig;
use crate::content::{ContentLoader, PlayableContent};
use crate::error::{Error, Result};
use crate::output::{AudioOutput, OutputEvent};
use crate::reconciler::{FetchRequest, PlaybackReconciler, ReconcilerSettings};
use crate::snapshot::OnAirSnapshot;
use crate::store::StationStore;

/// Commands sent to the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    Mute,
    Unmute,
    SetVolume(f64),
    /// "Go live now": restart the timeline on this track
    DirectPlay(String),
    UpdateCatalog(Catalog),
    UpdateSchedule(ScheduleTable),
    /// Stores an uploaded file and appends it to the rotation
    Upload {
        file_name: String,
        duration_secs: f64,
        is_live_show: bool,
        blob: StoredBlob,
        reply: oneshot::Sender<Result<Track>>,
    },
    /// Removes a track, its stored bytes and its schedule slots
    RemoveTrack {
        track_id: String,
        reply: oneshot::Sender<Result<Track>>,
    },
    /// Replaces the stored bytes of an existing track
    StoreContent { track_id: String, blob: StoredBlob },
    Shutdown,
}

impl EngineCommand {
    fn name(&self) -> &'static str {
        match self {
            EngineCommand::Mute => "mute",
            EngineCommand::Unmute => "unmute",
            EngineCommand::SetVolume(_) => "set_volume",
            EngineCommand::DirectPlay(_) => "direct_play",
            EngineCommand::UpdateCatalog(_) => "update_catalog",
            EngineCommand::UpdateSchedule(_) => "update_schedule",
            EngineCommand::Upload { .. } => "upload",
            EngineCommand::RemoveTrack { .. } => "remove_track",
            EngineCommand::StoreContent { .. } => "store_content",
            EngineCommand::Shutdown => "shutdown",
        }
    }
}

/// Configures and spawns an [`OnAirEngine`].
pub struct EngineBuilder {
    config: OnAirConfig,
    output: Arc<dyn AudioOutput>,
    clock: Arc<dyn Clock>,
    loader: ContentLoader,
    store: Option<StationStore>,
    catalog: Catalog,
    schedule: ScheduleTable,
    epoch: Option<DateTime<Utc>>,
}

impl EngineBuilder {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            config: OnAirConfig::default(),
            output,
            clock: Arc::new(SystemClock),
            loader: ContentLoader::default(),
            store: None,
            catalog: Catalog::new(),
            schedule: ScheduleTable::new(),
            epoch: None,
        }
    }

    pub fn config(mut self, config: OnAirConfig) -> Self {
        self.config = config.sanitized();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn content_loader(mut self, loader: ContentLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn schedule(mut self, schedule: ScheduleTable) -> Self {
        self.schedule = schedule;
        self
    }

    /// Overrides the configured epoch
    pub fn epoch(mut self, epoch: DateTime<Utc>) -> Self {
        self.epoch = Some(epoch);
        self
    }

    /// Takes catalog, schedule and (when present) epoch from a document.
    pub fn document(mut self, doc: &StationDocument) -> Self {
        self.catalog = doc.catalog();
        self.schedule = doc.schedule_table();
        if let Some(epoch) = doc.epoch {
            self.epoch = Some(epoch);
        }
        self
    }

    /// Loads the station document and keeps the store to persist epoch
    /// changes.
    pub async fn station_store(self, store: StationStore) -> Self {
        let (doc, _report) = store.load().await;
        let mut builder = self.document(&doc);
        builder.store = Some(store);
        builder
    }

    /// Starts the engine task.
    pub fn spawn(self) -> OnAirEngine {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(32);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (fetch_tx, mut fetch_rx) = mpsc::unbounded_channel();

        let config = self.config;
        let epoch = self.epoch.unwrap_or_else(|| config.epoch());
        let (snapshot_tx, snapshot_rx) = watch::channel(OnAirSnapshot::offline(
            epoch,
            config.start_muted,
            config.initial_volume,
        ));

        let reconciler = PlaybackReconciler::new(
            self.output,
            ReconcilerSettings::from(&config),
            event_tx,
            config.start_muted,
            config.initial_volume,
        );

        let mut state = EngineState {
            clock: self.clock,
            loader: self.loader,
            store: self.store,
            catalog: self.catalog,
            schedule: self.schedule,
            epoch,
            reconciler,
            fetch_tx,
            fetch: None,
            snapshots: snapshot_tx,
            history_len: config.history_len,
        };

        let join_handle = tokio::spawn(async move {
            info!(
                tracks = state.catalog.len(),
                schedule = state.schedule.len(),
                epoch = %state.epoch,
                "Starting on-air engine"
            );

            let mut rotation_tick = interval(config.rotation_tick());
            rotation_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut drift_tick = interval(config.drift_tick());
            drift_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            state.reconciler.set_volume(config.initial_volume).await;

            loop {
                tokio::select! {
                    _ = rotation_tick.tick() => {
                        state.tick(TickKind::Rotation).await;
                    }
                    _ = drift_tick.tick() => {
                        state.tick(TickKind::Drift).await;
                    }
                    Some(outcome) = fetch_rx.recv() => {
                        state.on_fetch(outcome).await;
                    }
                    Some(event) = event_rx.recv() => {
                        state.on_output_event(event).await;
                    }
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(EngineCommand::Shutdown) | None => break,
                            Some(cmd) => state.handle_command(cmd).await,
                        }
                    }
                }
            }

            state.shutdown().await;
            info!("On-air engine stopped");
        });

        OnAirEngine {
            commands: cmd_tx,
            snapshots: snapshot_rx,
            join_handle,
        }
    }
}

/// Handle to the running engine
pub struct OnAirEngine {
    commands: mpsc::Sender<EngineCommand>,
    snapshots: watch::Receiver<OnAirSnapshot>,
    join_handle: JoinHandle<()>,
}

impl OnAirEngine {
    pub fn builder(output: Arc<dyn AudioOutput>) -> EngineBuilder {
        EngineBuilder::new(output)
    }

    pub async fn send(&self, cmd: EngineCommand) -> Result<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| Error::EngineStopped)
    }

    pub async fn mute(&self) -> Result<()> {
        self.send(EngineCommand::Mute).await
    }

    pub async fn unmute(&self) -> Result<()> {
        self.send(EngineCommand::Unmute).await
    }

    pub async fn set_volume(&self, volume: f64) -> Result<()> {
        self.send(EngineCommand::SetVolume(volume)).await
    }

    pub async fn direct_play(&self, track_id: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::DirectPlay(track_id.into())).await
    }

    pub async fn update_catalog(&self, catalog: Catalog) -> Result<()> {
        self.send(EngineCommand::UpdateCatalog(catalog)).await
    }

    pub async fn update_schedule(&self, schedule: ScheduleTable) -> Result<()> {
        self.send(EngineCommand::UpdateSchedule(schedule)).await
    }

    /// Stores `blob` and appends a track named after `file_name`
    /// (`Artist - Title.ext`). Returns the new track.
    pub async fn upload(
        &self,
        file_name: impl Into<String>,
        duration_secs: f64,
        is_live_show: bool,
        blob: StoredBlob,
    ) -> Result<Track> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Upload {
            file_name: file_name.into(),
            duration_secs,
            is_live_show,
            blob,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::EngineStopped)?
    }

    /// Removes a track from the station. Returns the removed track.
    pub async fn remove_track(&self, track_id: impl Into<String>) -> Result<Track> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::RemoveTrack {
            track_id: track_id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::EngineStopped)?
    }

    pub async fn store_content(&self, track_id: impl Into<String>, blob: StoredBlob) -> Result<()> {
        self.send(EngineCommand::StoreContent {
            track_id: track_id.into(),
            blob,
        })
        .await
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> OnAirSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OnAirSnapshot> {
        self.snapshots.clone()
    }

    /// Stops both timers, the device and any pending fetch, then waits for
    /// the task to finish.
    pub async fn shutdown(self) -> Result<()> {
        // already gone is fine
        let _ = self.commands.send(EngineCommand::Shutdown).await;
        match self.join_handle.await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => {
                warn!("Engine task cancelled: {err}");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickKind {
    Rotation,
    Drift,
}

struct FetchOutcome {
    generation: u64,
    content: Option<PlayableContent>,
}

struct FetchTask {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct EngineState {
    clock: Arc<dyn Clock>,
    loader: ContentLoader,
    store: Option<StationStore>,
    catalog: Catalog,
    schedule: ScheduleTable,
    epoch: DateTime<Utc>,
    reconciler: PlaybackReconciler,
    fetch_tx: mpsc::UnboundedSender<FetchOutcome>,
    fetch: Option<FetchTask>,
    snapshots: watch::Sender<OnAirSnapshot>,
    history_len: usize,
}

impl EngineState {
    fn resolve(&self, now: DateTime<Utc>) -> Resolution {
        let slot = self.clock.local_slot(now);
        resolve_all(
            self.catalog.as_slice(),
            &self.schedule,
            self.epoch,
            now,
            slot,
            self.history_len,
        )
    }

    async fn tick(&mut self, kind: TickKind) {
        let now = self.clock.now();
        let resolution = self.resolve(now);

        let track = resolution
            .target
            .as_ref()
            .and_then(|t| self.catalog.get(&t.track_id));
        if let Some(request) = self.reconciler.select(resolution.target.as_ref(), track).await {
            self.start_fetch(request);
        }
        self.drop_stale_fetch();

        if kind == TickKind::Drift {
            if let Some(target) = &resolution.target {
                self.reconciler.reconcile(target).await;
            }
        }

        self.publish(&resolution, now);
    }

    fn start_fetch(&mut self, request: FetchRequest) {
        if let Some(previous) = self.fetch.take() {
            debug!(generation = previous.generation, "Aborting superseded content fetch");
            previous.cancel.cancel();
            previous.handle.abort();
        }

        let generation = request.generation;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let loader = self.loader.clone();
        let tx = self.fetch_tx.clone();

        let handle = tokio::spawn(async move {
            let content = match loader.load(&request.track, generation, &token).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(track_id = %request.track.id, generation, error = %e, "Content fetch failed");
                    None
                }
            };
            // the engine may be shutting down
            let _ = tx.send(FetchOutcome {
                generation,
                content,
            });
        });

        self.fetch = Some(FetchTask {
            generation,
            cancel,
            handle,
        });
    }

    /// Cancels a fetch the reconciler no longer waits for (idle, shutdown).
    fn drop_stale_fetch(&mut self) {
        let stale = matches!(&self.fetch, Some(task) if task.generation != self.reconciler.generation());
        if stale {
            if let Some(task) = self.fetch.take() {
                debug!(generation = task.generation, "Cancelling stale content fetch");
                task.cancel.cancel();
                task.handle.abort();
            }
        }
    }

    async fn on_fetch(&mut self, outcome: FetchOutcome) {
        if matches!(&self.fetch, Some(task) if task.generation == outcome.generation) {
            self.fetch = None;
        }
        self.reconciler
            .on_content(outcome.generation, outcome.content)
            .await;
        self.refresh();
    }

    async fn on_output_event(&mut self, event: OutputEvent) {
        let now = self.clock.now();
        let resolution = self.resolve(now);
        let fresh_offset = resolution
            .target
            .as_ref()
            .filter(|t| self.reconciler.current_track_id() == Some(t.track_id.as_str()))
            .map(|t| t.offset_secs);
        self.reconciler.on_output_event(event, fresh_offset).await;
        self.publish(&resolution, now);
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        debug!(command = cmd.name(), "Engine command");
        match cmd {
            EngineCommand::Mute => {
                self.reconciler.set_muted(true).await;
                self.refresh();
            }
            EngineCommand::Unmute => {
                self.reconciler.set_muted(false).await;
                self.tick(TickKind::Drift).await;
            }
            EngineCommand::SetVolume(volume) => {
                self.reconciler.set_volume(volume).await;
                self.refresh();
            }
            EngineCommand::DirectPlay(track_id) => self.direct_play(&track_id).await,
            EngineCommand::UpdateCatalog(catalog) => {
                info!(tracks = catalog.len(), "Catalog updated");
                self.catalog = catalog;
                self.persist_station().await;
                self.tick(TickKind::Rotation).await;
            }
            EngineCommand::UpdateSchedule(schedule) => {
                info!(entries = schedule.len(), "Schedule updated");
                self.schedule = schedule;
                self.persist_station().await;
                self.tick(TickKind::Rotation).await;
            }
            EngineCommand::Upload {
                file_name,
                duration_secs,
                is_live_show,
                blob,
                reply,
            } => {
                let result = self
                    .upload(&file_name, duration_secs, is_live_show, blob)
                    .await;
                // the caller may have given up waiting
                let _ = reply.send(result);
            }
            EngineCommand::RemoveTrack { track_id, reply } => {
                let result = self.remove_track(&track_id).await;
                let _ = reply.send(result);
            }
            EngineCommand::StoreContent { track_id, blob } => {
                if let Err(e) = self.loader.store().put(&track_id, blob).await {
                    warn!(track_id = %track_id, error = %e, "Failed to store track content");
                    return;
                }
                if self.reconciler.mark_content_changed(&track_id) {
                    self.tick(TickKind::Drift).await;
                }
            }
            // handled by the task loop
            EngineCommand::Shutdown => {}
        }
    }

    async fn upload(
        &mut self,
        file_name: &str,
        duration_secs: f64,
        is_live_show: bool,
        blob: StoredBlob,
    ) -> Result<Track> {
        let now = self.clock.now();
        let mut catalog = self.catalog.clone();
        let track = catalog
            .add_upload(file_name, duration_secs, is_live_show, now)
            .clone();
        // bytes first: a track without content would only be a silent gap
        self.loader.store().put(&track.id, blob).await?;
        self.catalog = catalog;
        self.persist_station().await;
        self.tick(TickKind::Rotation).await;
        Ok(track)
    }

    async fn remove_track(&mut self, track_id: &str) -> Result<Track> {
        let track = self.catalog.remove(track_id)?;
        let slots = self.schedule.remove_track(track_id);
        match self.loader.store().delete(track_id).await {
            Ok(deleted) => debug!(track_id, deleted, slots, "Track content released"),
            Err(e) => warn!(track_id, error = %e, "Failed to delete track content"),
        }
        self.persist_station().await;
        self.tick(TickKind::Rotation).await;
        Ok(track)
    }

    async fn persist_station(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_station(&self.catalog, &self.schedule).await {
                warn!(error = %e, "Failed to persist the station");
            }
        }
    }

    async fn direct_play(&mut self, track_id: &str) {
        let now = self.clock.now();
        let Some(epoch) = epoch_for_direct_play(self.catalog.as_slice(), track_id, now) else {
            warn!(track_id, "Direct play of a track missing from the catalog ignored");
            return;
        };

        info!(track_id, epoch = %epoch, "Going live now");
        self.epoch = epoch;
        if let Some(store) = &self.store {
            if let Err(e) = store.save_epoch(epoch).await {
                warn!(error = %e, "Failed to persist the new epoch");
            }
        }
        self.reconciler.set_muted(false).await;
        self.tick(TickKind::Drift).await;
    }

    async fn shutdown(&mut self) {
        if let Some(task) = self.fetch.take() {
            task.cancel.cancel();
            task.handle.abort();
        }
        self.reconciler.shutdown().await;
        self.refresh();
    }

    fn refresh(&mut self) {
        let now = self.clock.now();
        let resolution = self.resolve(now);
        self.publish(&resolution, now);
    }

    fn publish(&self, resolution: &Resolution, now: DateTime<Utc>) {
        let snapshot = OnAirSnapshot::build(
            &self.catalog,
            resolution,
            self.reconciler.state(),
            self.reconciler.is_muted(),
            self.reconciler.volume(),
            self.epoch,
            now,
        );
        self.snapshots.send_replace(snapshot);
    }
}
