//! Per-destination playback sessions.
//!
//! A [`Session`] holds the desired playback state of one destination (queue,
//! current track, volume, filters, voice binding) independently of the
//! instance that currently plays it, so the state can be replayed elsewhere
//! after a failover.
//!
//! State is guarded by one async mutex per session: caller commands and the
//! dispatcher's routed events are applied strictly one after another.

mod queue;
mod registry;

pub use registry::SessionRegistry;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::channel::InstanceId;
use crate::error::{ErrorCode, LavaError, LavaResult};
use crate::events::{EventEmitter, PlayerEvent};
use crate::filters::{Filter, FilterChain, FilterKind};
use crate::instances::{Instance, InstanceRegistry};
use crate::protocol::{EndReason, Outbound, PlayerState, TrackEvent};
use crate::protocol_constants::{DEFAULT_VOLUME, MAX_VOLUME, MIN_VOLUME};
use crate::track::Track;
use crate::utils::now_millis;

use queue::Queue;

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// What happens once the current track finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopMode {
    #[default]
    None,
    /// Play the same track again.
    Track,
    /// Move the finished track to the back of the queue.
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
}

/// Options of a single [`Session::play`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayOptions {
    /// Start offset in milliseconds.
    pub start_time: Option<u64>,
    /// Stop once this offset (milliseconds) is reached.
    pub end_time: Option<u64>,
    /// Replace the active track instead of queueing behind it.
    pub replace: bool,
    /// Start paused.
    pub pause: Option<bool>,
    /// Initial volume.
    pub volume: Option<u16>,
}

impl PlayOptions {
    pub fn replacing() -> Self {
        Self {
            replace: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn start_at(mut self, millis: u64) -> Self {
        self.start_time = Some(millis);
        self
    }

    #[must_use]
    pub fn end_at(mut self, millis: u64) -> Self {
        self.end_time = Some(millis);
        self
    }

    #[must_use]
    pub fn paused(mut self) -> Self {
        self.pause = Some(true);
        self
    }

    #[must_use]
    pub fn with_volume(mut self, volume: u16) -> Self {
        self.volume = Some(volume);
        self
    }

    fn validate(&self, track: &Track) -> LavaResult<()> {
        if let Some(volume) = self.volume {
            check_volume(volume)?;
        }
        if track.is_stream() {
            return Ok(());
        }

        let length = track.length();
        if let Some(start) = self.start_time {
            if start >= length {
                return Err(LavaError::Validation(format!(
                    "start time {start} must be below the track length {length}"
                )));
            }
        }
        if let Some(end) = self.end_time {
            if end == 0 || end > length {
                return Err(LavaError::Validation(format!(
                    "end time {end} must be within 1..={length}"
                )));
            }
            if self.start_time.is_some_and(|start| start >= end) {
                return Err(LavaError::Validation(
                    "start time must be before end time".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// How a [`Session::play`] request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Sent to the assigned instance.
    Started,
    /// Another track is active; appended to the queue.
    Queued,
    /// No instance assigned; held until one is.
    Buffered,
}

/// Voice connection binding of a destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub session_id: String,
    /// Voice server update, forwarded verbatim.
    pub event: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

struct PendingPlay {
    track: Track,
    options: PlayOptions,
}

#[derive(Clone, Copy)]
enum Advance {
    Finished,
    Failed,
    Skipped,
}

struct SessionState {
    queue: Queue,
    current: Option<Track>,
    /// Identifier actually sent for `current`; matched against track events.
    current_encoded: Option<String>,
    end_time: Option<u64>,
    paused: bool,
    volume: u16,
    filters: FilterChain,
    loop_mode: LoopMode,
    shuffle: bool,
    /// Last position reported by the backend.
    position: u64,
    reported_at: Option<Instant>,
    /// Set while paused; the estimate stops advancing here.
    paused_at: Option<Instant>,
    /// Time spent paused since `reported_at`.
    paused_for: Duration,
    voice_connected: bool,
    voice: Option<VoiceState>,
    pending: VecDeque<PendingPlay>,
    /// Track whose exception already advanced the queue; its end is ignored.
    failed: Option<String>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            queue: Queue::default(),
            current: None,
            current_encoded: None,
            end_time: None,
            paused: false,
            volume: DEFAULT_VOLUME,
            filters: FilterChain::new(),
            loop_mode: LoopMode::None,
            shuffle: false,
            position: 0,
            reported_at: None,
            paused_at: None,
            paused_for: Duration::ZERO,
            voice_connected: false,
            voice: None,
            pending: VecDeque::new(),
            failed: None,
        }
    }

    fn status(&self) -> PlaybackStatus {
        match (&self.current, self.paused) {
            (None, _) => PlaybackStatus::Idle,
            (Some(_), true) => PlaybackStatus::Paused,
            (Some(_), false) => PlaybackStatus::Playing,
        }
    }

    fn clear_current(&mut self) {
        self.current = None;
        self.current_encoded = None;
        self.end_time = None;
        self.position = 0;
        self.reported_at = None;
        self.paused_at = None;
        self.paused_for = Duration::ZERO;
    }

    /// Anchors the estimate at a freshly known position.
    fn rebase(&mut self, position: u64) {
        let now = Instant::now();
        self.position = position;
        self.reported_at = Some(now);
        self.paused_at = self.paused.then_some(now);
        self.paused_for = Duration::ZERO;
    }

    fn set_paused(&mut self, pause: bool) {
        let now = Instant::now();
        match (self.paused_at, pause) {
            (None, true) => self.paused_at = Some(now),
            (Some(since), false) => {
                self.paused_for += now.saturating_duration_since(since);
                self.paused_at = None;
            }
            _ => {}
        }
        self.paused = pause;
    }

    fn estimated_position(&self) -> u64 {
        let Some(track) = &self.current else {
            return 0;
        };
        let elapsed = self.reported_at.map_or(0, |at| {
            let until = self.paused_at.unwrap_or_else(Instant::now);
            let played = until
                .saturating_duration_since(at)
                .saturating_sub(self.paused_for);
            u64::try_from(played.as_millis()).unwrap_or(u64::MAX)
        });
        let estimate = self.position.saturating_add(elapsed);
        if track.is_stream() {
            estimate
        } else {
            estimate.min(track.length())
        }
    }

    fn next_track(&mut self, finished: Option<Track>, how: Advance) -> Option<Track> {
        match (self.loop_mode, how) {
            (LoopMode::Track, Advance::Finished) if finished.is_some() => finished,
            (LoopMode::Queue, Advance::Finished | Advance::Skipped) => {
                if let Some(track) = finished {
                    self.queue.push(track);
                }
                self.queue.pop_next(self.shuffle)
            }
            _ => self.queue.pop_next(self.shuffle),
        }
    }
}

fn check_volume(volume: u16) -> LavaResult<()> {
    if (MIN_VOLUME..=MAX_VOLUME).contains(&volume) {
        Ok(())
    } else {
        Err(LavaError::Validation(format!(
            "volume {volume} outside {MIN_VOLUME}..={MAX_VOLUME}"
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Playback state machine of one destination.
pub struct Session {
    guild_id: String,
    /// Assigned instance; only changed while `state` is locked.
    instance: RwLock<Option<InstanceId>>,
    region_hint: RwLock<Option<String>>,
    state: Mutex<SessionState>,
    user_data: RwLock<HashMap<String, Value>>,
    instances: Arc<InstanceRegistry>,
    emitter: Arc<dyn EventEmitter>,
    pending_capacity: usize,
}

impl Session {
    pub(crate) fn new(
        guild_id: impl Into<String>,
        instance: Option<InstanceId>,
        region_hint: Option<String>,
        instances: Arc<InstanceRegistry>,
        emitter: Arc<dyn EventEmitter>,
        pending_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            guild_id: guild_id.into(),
            instance: RwLock::new(instance),
            region_hint: RwLock::new(region_hint),
            state: Mutex::new(SessionState::new()),
            user_data: RwLock::new(HashMap::new()),
            instances,
            emitter,
            pending_capacity,
        })
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// Id of the assigned instance; `None` while parked.
    pub fn instance_id(&self) -> Option<InstanceId> {
        self.instance.read().clone()
    }

    pub fn is_parked(&self) -> bool {
        self.instance.read().is_none()
    }

    pub fn region_hint(&self) -> Option<String> {
        self.region_hint.read().clone()
    }

    pub fn set_region_hint(&self, region: Option<String>) {
        *self.region_hint.write() = region;
    }

    fn assigned(&self) -> Option<Arc<Instance>> {
        let id = self.instance.read().clone()?;
        self.instances.get(&id)
    }

    /// Sends to the assigned instance. Parked sessions only keep the
    /// desired state, which is replayed on assignment.
    async fn send_if_assigned(&self, command: Outbound) -> LavaResult<()> {
        match self.assigned() {
            Some(instance) => instance.send(&command).await,
            None => Ok(()),
        }
    }

    fn emit(&self, event: PlayerEvent) {
        self.emitter.emit_player(event);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Playback commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Plays `track`, queues it behind the active track, or buffers it while
    /// no instance is assigned.
    pub async fn play(&self, track: Track, options: PlayOptions) -> LavaResult<PlayOutcome> {
        options.validate(&track)?;
        let mut state = self.state.lock().await;
        self.play_locked(&mut state, track, options).await
    }

    async fn play_locked(
        &self,
        state: &mut SessionState,
        track: Track,
        options: PlayOptions,
    ) -> LavaResult<PlayOutcome> {
        if state.current.is_some() && !options.replace {
            state.queue.push(track);
            return Ok(PlayOutcome::Queued);
        }
        let Some(instance) = self.assigned() else {
            self.buffer(state, track, options);
            return Ok(PlayOutcome::Buffered);
        };
        self.start(state, &instance, track, options).await?;
        Ok(PlayOutcome::Started)
    }

    fn buffer(&self, state: &mut SessionState, track: Track, options: PlayOptions) {
        if state.pending.len() >= self.pending_capacity {
            if let Some(dropped) = state.pending.pop_front() {
                let error = LavaError::Backpressure(format!(
                    "more than {} play requests waiting for an instance",
                    self.pending_capacity
                ));
                log::warn!(
                    "[Session:{}] Dropped buffered {}: {}",
                    self.guild_id,
                    dropped.track.identifier(),
                    error
                );
                self.emit(PlayerEvent::RequestDropped {
                    guild_id: self.guild_id.clone(),
                    identifier: dropped.track.identifier().to_string(),
                    code: error.code(),
                    message: error.to_string(),
                    timestamp: now_millis(),
                });
            }
        }
        log::debug!(
            "[Session:{}] No instance, buffering {}",
            self.guild_id,
            track.identifier()
        );
        state.pending.push_back(PendingPlay { track, options });
    }

    async fn start(
        &self,
        state: &mut SessionState,
        instance: &Instance,
        track: Track,
        options: PlayOptions,
    ) -> LavaResult<()> {
        let encoded = track.playable_identifier().await?;
        instance
            .send(&Outbound::Play {
                guild_id: self.guild_id.clone(),
                track: encoded.clone(),
                start_time: options.start_time,
                end_time: options.end_time,
                no_replace: !options.replace,
                pause: options.pause,
                volume: options.volume,
            })
            .await?;
        log::debug!(
            "[Session:{}] Playing {} on {}",
            self.guild_id,
            track.identifier(),
            instance.id()
        );

        if state.failed.as_deref() != Some(encoded.as_str()) {
            state.failed = None;
        }
        state.current = Some(track);
        state.current_encoded = Some(encoded);
        state.end_time = options.end_time;
        if let Some(pause) = options.pause {
            state.paused = pause;
        }
        state.rebase(options.start_time.unwrap_or(0));
        if let Some(volume) = options.volume {
            state.volume = volume;
        }
        Ok(())
    }

    pub async fn pause(&self, pause: bool) -> LavaResult<()> {
        let mut state = self.state.lock().await;
        self.send_if_assigned(Outbound::Pause {
            guild_id: self.guild_id.clone(),
            pause,
        })
        .await?;
        state.set_paused(pause);
        Ok(())
    }

    /// Seeks the current track. The reported position only changes once the
    /// backend confirms it.
    pub async fn seek(&self, position: u64) -> LavaResult<()> {
        let mut state = self.state.lock().await;
        let track = state
            .current
            .as_ref()
            .ok_or_else(|| LavaError::Validation("nothing is playing".to_string()))?;
        if !track.info().is_seekable() {
            return Err(LavaError::Validation(format!(
                "{} is a stream and cannot be seeked",
                track.identifier()
            )));
        }
        if position > track.length() {
            return Err(LavaError::Validation(format!(
                "position {position} is past the track length {}",
                track.length()
            )));
        }

        if self.is_parked() {
            state.rebase(position);
            return Ok(());
        }
        self.send_if_assigned(Outbound::Seek {
            guild_id: self.guild_id.clone(),
            position,
        })
        .await
    }

    pub async fn set_volume(&self, volume: u16) -> LavaResult<()> {
        check_volume(volume)?;
        let mut state = self.state.lock().await;
        self.send_if_assigned(Outbound::Volume {
            guild_id: self.guild_id.clone(),
            volume,
        })
        .await?;
        state.volume = volume;
        Ok(())
    }

    /// Clears the current track. The queue is kept.
    pub async fn stop(&self) -> LavaResult<()> {
        let mut state = self.state.lock().await;
        self.send_if_assigned(Outbound::Stop {
            guild_id: self.guild_id.clone(),
        })
        .await?;
        state.clear_current();
        Ok(())
    }

    /// Starts the next track now. Returns it, or `None` when the queue ran out.
    pub async fn skip(&self) -> LavaResult<Option<Track>> {
        let mut state = self.state.lock().await;
        let next = self.advance(&mut state, Advance::Skipped).await?;
        if next.is_none() {
            self.send_if_assigned(Outbound::Stop {
                guild_id: self.guild_id.clone(),
            })
            .await?;
        }
        Ok(next)
    }

    pub async fn set_loop(&self, mode: LoopMode) {
        self.state.lock().await.loop_mode = mode;
    }

    /// When enabled, the next track is picked at random from the queue.
    pub async fn set_shuffle(&self, enabled: bool) {
        self.state.lock().await.shuffle = enabled;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Filters
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn set_filters(&self, filters: FilterChain) -> LavaResult<()> {
        let mut state = self.state.lock().await;
        self.apply_filters(&mut state, filters).await
    }

    pub async fn set_filter(&self, filter: Filter) -> LavaResult<()> {
        let mut state = self.state.lock().await;
        let filters = state.filters.clone().with(filter);
        self.apply_filters(&mut state, filters).await
    }

    pub async fn remove_filter(&self, kind: FilterKind) -> LavaResult<Option<Filter>> {
        let mut state = self.state.lock().await;
        let mut filters = state.filters.clone();
        let removed = filters.remove(kind);
        if removed.is_some() {
            self.apply_filters(&mut state, filters).await?;
        }
        Ok(removed)
    }

    pub async fn clear_filters(&self) -> LavaResult<()> {
        let mut state = self.state.lock().await;
        self.apply_filters(&mut state, FilterChain::new()).await
    }

    pub async fn filter(&self, kind: FilterKind) -> Option<Filter> {
        self.state.lock().await.filters.get(kind).cloned()
    }

    pub async fn filters(&self) -> FilterChain {
        self.state.lock().await.filters.clone()
    }

    async fn apply_filters(&self, state: &mut SessionState, filters: FilterChain) -> LavaResult<()> {
        self.send_if_assigned(Outbound::Filters {
            guild_id: self.guild_id.clone(),
            filters: filters.to_payload(),
        })
        .await?;
        state.filters = filters;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn enqueue(&self, track: Track) {
        self.state.lock().await.queue.push(track);
    }

    pub async fn enqueue_all(&self, tracks: impl IntoIterator<Item = Track>) {
        let mut state = self.state.lock().await;
        for track in tracks {
            state.queue.push(track);
        }
    }

    pub async fn insert(&self, index: usize, track: Track) -> LavaResult<()> {
        self.state.lock().await.queue.insert(index, track)
    }

    /// Removes the queued track at `index` (0 is the next one up).
    pub async fn remove(&self, index: usize) -> LavaResult<Track> {
        self.state.lock().await.queue.remove(index)
    }

    pub async fn move_track(&self, from: usize, to: usize) -> LavaResult<()> {
        self.state.lock().await.queue.move_track(from, to)
    }

    /// Shuffles the upcoming tracks. The playing track stays where it is.
    pub async fn shuffle(&self) {
        self.state.lock().await.queue.shuffle();
    }

    pub async fn clear(&self) {
        self.state.lock().await.queue.clear();
    }

    /// Upcoming tracks.
    pub async fn queue(&self) -> Vec<Track> {
        self.state.lock().await.queue.to_vec()
    }

    /// The playing track followed by the queue.
    pub async fn tracks(&self) -> Vec<Track> {
        let state = self.state.lock().await;
        state
            .current
            .iter()
            .cloned()
            .chain(state.queue.to_vec())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn current(&self) -> Option<Track> {
        self.state.lock().await.current.clone()
    }

    pub async fn status(&self) -> PlaybackStatus {
        self.state.lock().await.status()
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    pub async fn volume(&self) -> u16 {
        self.state.lock().await.volume
    }

    pub async fn loop_mode(&self) -> LoopMode {
        self.state.lock().await.loop_mode
    }

    pub async fn shuffle_enabled(&self) -> bool {
        self.state.lock().await.shuffle
    }

    /// Last position reported by the backend.
    pub async fn position(&self) -> u64 {
        self.state.lock().await.position
    }

    /// Reported position advanced by the time elapsed since the report.
    pub async fn estimated_position(&self) -> u64 {
        self.state.lock().await.estimated_position()
    }

    /// Play requests waiting for an instance.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn voice_state(&self) -> Option<VoiceState> {
        self.state.lock().await.voice.clone()
    }

    /// Whether the backend reported a live voice connection.
    pub async fn is_voice_connected(&self) -> bool {
        self.state.lock().await.voice_connected
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Voice and user data
    // ─────────────────────────────────────────────────────────────────────────

    /// Binds the destination to a voice session and forwards the binding.
    ///
    /// If the event names an endpoint served by a region with a usable
    /// instance, that region becomes the session's region hint.
    pub async fn update_voice_state(
        &self,
        session_id: impl Into<String>,
        event: Value,
    ) -> LavaResult<()> {
        if let Some(region) = event
            .get("endpoint")
            .and_then(Value::as_str)
            .and_then(|endpoint| self.instances.region_for_endpoint(endpoint))
        {
            self.set_region_hint(Some(region));
        }

        let voice = VoiceState {
            session_id: session_id.into(),
            event,
        };
        let mut state = self.state.lock().await;
        state.voice = Some(voice.clone());
        self.send_if_assigned(Outbound::VoiceUpdate {
            guild_id: self.guild_id.clone(),
            session_id: voice.session_id,
            event: voice.event,
        })
        .await
    }

    pub fn store(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.user_data.write().insert(key.into(), value)
    }

    pub fn fetch(&self, key: &str) -> Option<Value> {
        self.user_data.read().get(key).cloned()
    }

    pub fn delete(&self, key: &str) -> Option<Value> {
        self.user_data.write().remove(key)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Backend input
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) async fn handle_player_update(&self, update: PlayerState) {
        {
            let mut state = self.state.lock().await;
            state.rebase(update.position);
            state.voice_connected = update.connected;
        }
        self.emit(PlayerEvent::PlayerUpdate {
            guild_id: self.guild_id.clone(),
            position: update.position,
            connected: update.connected,
            timestamp: now_millis(),
        });
    }

    pub(crate) async fn handle_track_event(&self, event: TrackEvent) {
        let mut state = self.state.lock().await;
        match event {
            TrackEvent::TrackStart { track, .. } => {
                self.emit(PlayerEvent::TrackStart {
                    guild_id: self.guild_id.clone(),
                    track,
                    timestamp: now_millis(),
                });
            }
            TrackEvent::TrackEnd { track, reason, .. } => {
                self.emit(PlayerEvent::TrackEnd {
                    guild_id: self.guild_id.clone(),
                    track: track.clone(),
                    reason: reason.clone(),
                    timestamp: now_millis(),
                });
                if state.current_encoded.as_deref() != Some(track.as_str()) {
                    return;
                }
                if state.failed.as_deref() == Some(track.as_str()) {
                    state.failed = None;
                    return;
                }
                if reason.may_start_next() {
                    let how = if reason == EndReason::LoadFailed {
                        Advance::Failed
                    } else {
                        Advance::Finished
                    };
                    self.auto_advance(&mut state, how).await;
                } else if reason != EndReason::Replaced {
                    state.clear_current();
                }
            }
            TrackEvent::TrackException {
                track, exception, ..
            } => {
                log::warn!(
                    "[Session:{}] Track exception ({}): {}",
                    self.guild_id,
                    exception.severity,
                    exception.message.as_deref().unwrap_or("unknown")
                );
                let failure = LavaError::PlayFailure(
                    exception
                        .message
                        .clone()
                        .unwrap_or_else(|| exception.cause.clone()),
                );
                self.emit(PlayerEvent::TrackException {
                    guild_id: self.guild_id.clone(),
                    track: track.clone(),
                    exception,
                    timestamp: now_millis(),
                });
                self.fail_current(&mut state, &track, failure).await;
            }
            TrackEvent::TrackStuck {
                track,
                threshold_ms,
                ..
            } => {
                log::warn!(
                    "[Session:{}] Track stuck for {}ms",
                    self.guild_id,
                    threshold_ms
                );
                self.emit(PlayerEvent::TrackStuck {
                    guild_id: self.guild_id.clone(),
                    track: track.clone(),
                    threshold_ms,
                    timestamp: now_millis(),
                });
                let failure = LavaError::PlayFailure(format!("stuck for {threshold_ms}ms"));
                self.fail_current(&mut state, &track, failure).await;
            }
            TrackEvent::WebSocketClosed {
                code,
                reason,
                by_remote,
                ..
            } => {
                state.voice_connected = false;
                self.emit(PlayerEvent::VoiceClosed {
                    guild_id: self.guild_id.clone(),
                    code,
                    reason,
                    by_remote,
                    timestamp: now_millis(),
                });
            }
        }
    }

    /// A failed track is skipped once and never retried.
    async fn fail_current(&self, state: &mut SessionState, track: &str, failure: LavaError) {
        if state.current_encoded.as_deref() != Some(track) || state.failed.as_deref() == Some(track)
        {
            return;
        }
        self.emit(PlayerEvent::PlayerError {
            guild_id: self.guild_id.clone(),
            code: failure.code(),
            message: failure.to_string(),
            timestamp: now_millis(),
        });
        state.failed = Some(track.to_string());
        self.auto_advance(state, Advance::Failed).await;
    }

    async fn auto_advance(&self, state: &mut SessionState, how: Advance) {
        if let Err(e) = self.advance(state, how).await {
            log::warn!("[Session:{}] Could not start next track: {}", self.guild_id, e);
            self.emit(PlayerEvent::PlayerError {
                guild_id: self.guild_id.clone(),
                code: e.code(),
                message: e.to_string(),
                timestamp: now_millis(),
            });
        }
    }

    /// Replaces the current track according to the loop mode.
    async fn advance(&self, state: &mut SessionState, mut how: Advance) -> LavaResult<Option<Track>> {
        let mut finished = state.current.take();
        state.clear_current();

        loop {
            let Some(next) = state.next_track(finished.take(), how) else {
                log::debug!("[Session:{}] Queue exhausted", self.guild_id);
                self.emit(PlayerEvent::QueueEnd {
                    guild_id: self.guild_id.clone(),
                    timestamp: now_millis(),
                });
                return Ok(None);
            };

            let Some(instance) = self.assigned() else {
                state.current = Some(next.clone());
                return Ok(Some(next));
            };

            match self
                .start(state, &instance, next.clone(), PlayOptions::replacing())
                .await
            {
                Ok(()) => return Ok(Some(next)),
                Err(e @ LavaError::Load(_)) => {
                    log::warn!(
                        "[Session:{}] Skipping unresolvable {}: {}",
                        self.guild_id,
                        next.identifier(),
                        e
                    );
                    self.emit(PlayerEvent::PlayerError {
                        guild_id: self.guild_id.clone(),
                        code: e.code(),
                        message: e.to_string(),
                        timestamp: now_millis(),
                    });
                    how = Advance::Failed;
                }
                Err(e) => {
                    // kept so a later reassignment replays it
                    state.current = Some(next);
                    return Err(e);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Instance changes
    // ─────────────────────────────────────────────────────────────────────────

    /// Moves the session to `target` (or parks it with `None`) and replays
    /// its state there. Targeting the current instance only replays.
    pub(crate) async fn reassign(&self, target: Option<Arc<Instance>>) {
        let mut state = self.state.lock().await;
        let previous = self.instance_id();
        let current = target.as_ref().map(|instance| instance.id().to_string());

        if previous != current {
            if let Some(old) = previous.as_deref().and_then(|id| self.instances.get(id)) {
                let destroy = Outbound::Destroy {
                    guild_id: self.guild_id.clone(),
                };
                if let Err(e) = old.send(&destroy).await {
                    log::debug!(
                        "[Session:{}] Destroy on {} skipped: {}",
                        self.guild_id,
                        old.id(),
                        e
                    );
                }
            }
            *self.instance.write() = current.clone();
            log::info!(
                "[Session:{}] Instance {} -> {}",
                self.guild_id,
                previous.as_deref().unwrap_or("none"),
                current.as_deref().unwrap_or("none")
            );
            self.emit(PlayerEvent::InstanceChanged {
                guild_id: self.guild_id.clone(),
                previous,
                current,
                timestamp: now_millis(),
            });
        }

        if let Some(instance) = target {
            self.replay(&mut state, &instance).await;
        }
    }

    async fn replay(&self, state: &mut SessionState, instance: &Instance) {
        if let Err(e) = self.restore(state, instance).await {
            log::warn!(
                "[Session:{}] Restoring state on {} failed: {}",
                self.guild_id,
                instance.id(),
                e
            );
            self.emit(PlayerEvent::PlayerError {
                guild_id: self.guild_id.clone(),
                code: e.code(),
                message: e.to_string(),
                timestamp: now_millis(),
            });
        }

        let pending: Vec<PendingPlay> = state.pending.drain(..).collect();
        for PendingPlay { track, options } in pending {
            let identifier = track.identifier().to_string();
            if let Err(e) = self.play_locked(state, track, options).await {
                self.emit(PlayerEvent::RequestDropped {
                    guild_id: self.guild_id.clone(),
                    identifier,
                    code: e.code(),
                    message: e.to_string(),
                    timestamp: now_millis(),
                });
            }
        }
    }

    /// Voice binding first, then the current track at its last reported
    /// position, then filters.
    async fn restore(&self, state: &mut SessionState, instance: &Instance) -> LavaResult<()> {
        if let Some(voice) = &state.voice {
            instance
                .send(&Outbound::VoiceUpdate {
                    guild_id: self.guild_id.clone(),
                    session_id: voice.session_id.clone(),
                    event: voice.event.clone(),
                })
                .await?;
        }

        if let Some(track) = state.current.clone() {
            let position = state.position;
            let resumable = position > 0 && track.info().is_seekable() && position < track.length();
            let options = PlayOptions {
                start_time: resumable.then_some(position),
                end_time: state.end_time,
                replace: true,
                pause: state.paused.then_some(true),
                volume: (state.volume != DEFAULT_VOLUME).then_some(state.volume),
            };
            self.start(state, instance, track, options).await?;
        } else {
            if state.volume != DEFAULT_VOLUME {
                instance
                    .send(&Outbound::Volume {
                        guild_id: self.guild_id.clone(),
                        volume: state.volume,
                    })
                    .await?;
            }
            if state.paused {
                instance
                    .send(&Outbound::Pause {
                        guild_id: self.guild_id.clone(),
                        pause: true,
                    })
                    .await?;
            }
        }

        if !state.filters.is_empty() {
            instance
                .send(&Outbound::Filters {
                    guild_id: self.guild_id.clone(),
                    filters: state.filters.to_payload(),
                })
                .await?;
        }
        Ok(())
    }

    /// Tears the session down on its instance and resets all state.
    pub(crate) async fn destroy(&self) {
        let mut state = self.state.lock().await;
        if let Some(instance) = self.assigned() {
            let destroy = Outbound::Destroy {
                guild_id: self.guild_id.clone(),
            };
            if let Err(e) = instance.send(&destroy).await {
                log::debug!("[Session:{}] Destroy skipped: {}", self.guild_id, e);
            }
        }
        *state = SessionState::new();
        *self.instance.write() = None;
        log::info!("[Session:{}] Destroyed", self.guild_id);
    }
}
