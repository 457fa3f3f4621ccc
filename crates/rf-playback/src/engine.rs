//! Playback Engine
//!
//! Ties the pools, registry and command queue together.
//!
//! ## Thread Safety Design
//!
//! The engine is split into two parts:
//! - `PlaybackEngine`: owner-thread context. All mutation of channels,
//!   instances and the registry happens here, without locks.
//! - `EngineHandle`: cloneable, `Send + Sync`. Every mutating call is
//!   captured as a closure and queued; the owner runs it during `tick`.
//!
//! ## Tick Order
//!
//! 1. Advance the clock
//! 2. Drain at most `command_budget` queued commands
//! 3. Run due deferred tasks (generation and cancellation checked)
//! 4. Tick instances that were live before this tick's commands ran
//! 5. Release stopped instances back to the instance pool
//! 6. Channel pool shrink check

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, PushError, RingBuffer};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::channel::ChannelId;
use crate::channel_pool::{ChannelPool, PoolStats, StealCandidate, select_steal_victim};
use crate::command::{CommandQueue, CommandSender, OwnerThread};
use crate::config::EngineConfig;
use crate::definition::{Bank, BankId, EventDefinition};
use crate::error::{PlaybackError, PlaybackResult};
use crate::history::{HistoryEntry, HistoryKind, HistoryRing};
use crate::host::Host;
use crate::instance::{
    CancellationToken, EmitterId, EventInstance, InstanceStatus, RemainingTime, TickContext,
};
use crate::instance_pool::{EventInstancePool, Handle, SlotTable};
use crate::registry::{BankLoadReport, EventRegistry};

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Event to play: by registered name or by definition
#[derive(Debug, Clone)]
pub enum EventRef {
    Name(String),
    Definition(Arc<EventDefinition>),
}

impl From<&str> for EventRef {
    fn from(name: &str) -> Self {
        EventRef::Name(name.to_string())
    }
}

impl From<String> for EventRef {
    fn from(name: String) -> Self {
        EventRef::Name(name)
    }
}

impl From<Arc<EventDefinition>> for EventRef {
    fn from(definition: Arc<EventDefinition>) -> Self {
        EventRef::Definition(definition)
    }
}

impl From<&Arc<EventDefinition>> for EventRef {
    fn from(definition: &Arc<EventDefinition>) -> Self {
        EventRef::Definition(Arc::clone(definition))
    }
}

/// Which live instances a `stop_all` affects
#[derive(Debug, Clone)]
pub enum StopTarget {
    /// Instances of this exact definition
    Definition(Arc<EventDefinition>),
    /// Instances whose event has this name
    Name(String),
    /// Instances whose definition carries this group id
    Group(u32),
    /// Instances playing on this emitter
    Emitter(EmitterId),
    All,
}

impl StopTarget {
    fn matches(&self, instance: &EventInstance) -> bool {
        match self {
            StopTarget::Definition(def) => instance
                .definition()
                .is_some_and(|d| Arc::ptr_eq(d, def)),
            StopTarget::Name(name) => instance.name() == name,
            StopTarget::Group(group) => instance
                .definition()
                .is_some_and(|d| d.group_id == *group),
            StopTarget::Emitter(emitter) => instance.emitter() == *emitter,
            StopTarget::All => true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT: PLAYBACK ACTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Instruction for the rendering backend
///
/// Returned from `tick()` so the audio backend can react.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackAction {
    /// Begin sample playback on a channel
    Start {
        handle: Handle,
        channel: ChannelId,
        clip: String,
        volume: f32,
        pitch: f32,
        looping: bool,
        /// Engine time to begin at; `None` = immediately
        start_at: Option<f64>,
        position: [f32; 3],
    },
    /// Mix values changed
    Update {
        handle: Handle,
        channel: ChannelId,
        volume: f32,
        pitch: f32,
        position: [f32; 3],
    },
    /// Silence and free a channel
    Stop { handle: Handle, channel: ChannelId },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct MixState {
    volume: f32,
    pitch: f32,
    position: [f32; 3],
}

impl MixState {
    fn of(instance: &EventInstance) -> Self {
        Self {
            volume: instance.effective_volume(),
            pitch: instance.effective_pitch(),
            position: instance.position(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NOTIFICATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a lifecycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Playback completed or was stopped
    Finished,
    /// Play request failed after an instance was allocated
    Failed,
}

/// Completion notice, sent once per instance lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub handle: Handle,
    pub name: String,
    pub kind: NotificationKind,
}

/// Notices that did not fit in the ring, oldest first
///
/// The owner only writes to the ring while this is empty, so every ring
/// entry is older than every spilled one.
type NotificationSpill = Arc<Mutex<VecDeque<Notification>>>;

/// Consumer end of the notification ring (any single thread)
///
/// Delivery is lossless: when the ring is full the owner spills into a
/// shared queue, which is read after the ring.
pub struct NotificationReceiver {
    rx: Consumer<Notification>,
    spill: NotificationSpill,
}

impl NotificationReceiver {
    pub fn pop(&mut self) -> Option<Notification> {
        match self.rx.pop() {
            Ok(n) => Some(n),
            Err(_) => self.spill.lock().pop_front(),
        }
    }

    /// Take everything currently queued, in completion order
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::with_capacity(self.rx.slots());
        while let Ok(n) = self.rx.pop() {
            out.push(n);
        }
        out.extend(self.spill.lock().drain(..));
        out
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFERRED TASKS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferredKind {
    StopGraceful,
}

/// Work scheduled against one instance lifecycle
#[derive(Debug)]
struct DeferredTask {
    handle: Handle,
    due: f64,
    token: CancellationToken,
    kind: DeferredKind,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE (Thread-safe)
// ═══════════════════════════════════════════════════════════════════════════════

/// State readable from any thread
struct EngineShared {
    owner: Arc<OwnerThread>,
    slots: Arc<SlotTable>,
    live_count: AtomicUsize,
    /// Engine clock as `f64` bits
    now_bits: AtomicU64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE HANDLE (Thread-safe, any thread)
// ═══════════════════════════════════════════════════════════════════════════════

/// Thread-safe entry point for non-owner threads
///
/// Mutating calls are queued and take effect during a later `tick` on the
/// owner thread. Plays return `Handle::INVALID` as a placeholder; use
/// `play_deferred` to learn the real handle.
#[derive(Clone)]
pub struct EngineHandle {
    commands: CommandSender<PlaybackEngine>,
    shared: Arc<EngineShared>,
}

/// Result of a queued play, available after the owner drains it
pub struct PendingPlay {
    rx: crossbeam_channel::Receiver<Handle>,
}

impl PendingPlay {
    /// Real handle, once the owner thread has executed the request
    pub fn try_get(&self) -> Option<Handle> {
        self.rx.try_recv().ok()
    }

    /// Block up to `timeout` for the result
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Handle> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl EngineHandle {
    /// Whether the calling thread owns the engine
    pub fn is_owner_thread(&self) -> bool {
        self.shared.owner.is_current()
    }

    /// Commands waiting for the owner
    pub fn pending_commands(&self) -> usize {
        self.commands.pending()
    }

    /// Live instances as of the last tick
    pub fn live_count(&self) -> usize {
        self.shared.live_count.load(Ordering::Relaxed)
    }

    /// Engine clock as of the last tick
    pub fn now(&self) -> f64 {
        f64::from_bits(self.shared.now_bits.load(Ordering::Relaxed))
    }

    /// Generation-checked validity, safe on any thread
    pub fn is_valid(&self, handle: Handle) -> bool {
        self.shared.slots.is_valid(handle)
    }

    /// Queue a play; returns the `Handle::INVALID` placeholder
    pub fn play(&self, event: impl Into<EventRef>, emitter: EmitterId) -> Handle {
        let event = event.into();
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            engine.play(event, emitter);
        });
        Handle::INVALID
    }

    /// Queue a play and get a ticket for the real handle
    pub fn play_deferred(&self, event: impl Into<EventRef>, emitter: EmitterId) -> PendingPlay {
        let event = event.into();
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            let _ = tx.send(engine.play(event, emitter));
        });
        PendingPlay { rx }
    }

    /// Queue a scheduled play; returns the `Handle::INVALID` placeholder
    pub fn play_scheduled(
        &self,
        event: impl Into<EventRef>,
        emitter: EmitterId,
        scheduled_time: f64,
    ) -> Handle {
        let event = event.into();
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            engine.play_scheduled(event, emitter, scheduled_time);
        });
        Handle::INVALID
    }

    pub fn stop(&self, handle: Handle) {
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            engine.stop(handle);
        });
    }

    pub fn stop_immediate(&self, handle: Handle) {
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            engine.stop_immediate(handle);
        });
    }

    pub fn stop_all(&self, target: StopTarget) {
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            engine.stop_all(target);
        });
    }

    pub fn load_bank(&self, bank: Arc<Bank>, overwrite: bool) {
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            if let Err(e) = engine.load_bank(bank, overwrite) {
                log::warn!("[EngineHandle] load_bank: {}", e);
            }
        });
    }

    pub fn unload_bank(&self, bank: BankId) {
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            if let Err(e) = engine.unload_bank(bank) {
                log::warn!("[EngineHandle] unload_bank: {}", e);
            }
        });
    }

    pub fn unload_bank_and_stop(&self, bank: BankId) {
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            if let Err(e) = engine.unload_bank_and_stop(bank) {
                log::warn!("[EngineHandle] unload_bank_and_stop: {}", e);
            }
        });
    }

    pub fn set_parameter(&self, name: impl Into<String>, value: f32) {
        let name = name.into();
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            engine.set_parameter(name, value);
        });
    }

    pub fn set_pitch(&self, handle: Handle, pitch: f32) {
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            if let Err(e) = engine.set_pitch(handle, pitch) {
                log::warn!("[EngineHandle] set_pitch on {}: {}", handle, e);
            }
        });
    }

    pub fn set_volume(&self, handle: Handle, volume: f32) {
        self.commands.submit(move |engine: &mut PlaybackEngine| {
            if let Err(e) = engine.set_volume(handle, volume) {
                log::warn!("[EngineHandle] set_volume on {}: {}", handle, e);
            }
        });
    }

    /// Queue any owner-thread operation
    pub fn submit(&self, command: impl FnOnce(&mut PlaybackEngine) + Send + 'static) -> bool {
        self.commands.submit(command)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAYBACK ENGINE (Owner thread only)
// ═══════════════════════════════════════════════════════════════════════════════

/// Owner-thread playback context
///
/// Multiple engines are fully independent. Move it to the thread that will
/// tick it and call `bind_to_current_thread` there.
pub struct PlaybackEngine {
    config: EngineConfig,
    host: Host,
    channels: ChannelPool,
    instances: EventInstancePool,
    registry: EventRegistry,
    commands: CommandQueue<PlaybackEngine>,
    command_tx: CommandSender<PlaybackEngine>,
    shared: Arc<EngineShared>,
    /// Live instances in start order
    live: Vec<Handle>,
    parameters: HashMap<String, f32>,
    deferred: Vec<DeferredTask>,
    actions: Vec<PlaybackAction>,
    mix_state: HashMap<Handle, MixState>,
    history: HistoryRing<HistoryEntry>,
    notifications: Producer<Notification>,
    spill: NotificationSpill,
    now: f64,
}

/// Create a new playback engine
///
/// Returns a tuple of:
/// - `EngineHandle`: thread-safe handle for any thread
/// - `PlaybackEngine`: owner-thread context, bound to the calling thread
/// - `NotificationReceiver`: completion notices
pub fn create_engine(
    config: EngineConfig,
    host: Host,
) -> PlaybackResult<(EngineHandle, PlaybackEngine, NotificationReceiver)> {
    config.validate()?;

    let (command_tx, commands) = CommandQueue::new();
    let (notify_tx, notify_rx) = RingBuffer::new(config.notification_capacity);
    let spill = NotificationSpill::default();
    let slots = Arc::new(SlotTable::new());

    let shared = Arc::new(EngineShared {
        owner: Arc::clone(commands.owner()),
        slots: Arc::clone(&slots),
        live_count: AtomicUsize::new(0),
        now_bits: AtomicU64::new(0f64.to_bits()),
    });

    let handle = EngineHandle {
        commands: command_tx.clone(),
        shared: Arc::clone(&shared),
    };

    let engine = PlaybackEngine {
        channels: ChannelPool::new(config.pool.clone(), 0.0),
        instances: EventInstancePool::with_table(config.initial_instance_capacity, slots),
        registry: EventRegistry::new(),
        commands,
        command_tx,
        shared,
        live: Vec::with_capacity(config.initial_instance_capacity),
        parameters: HashMap::new(),
        deferred: Vec::new(),
        actions: Vec::new(),
        mix_state: HashMap::new(),
        history: HistoryRing::new(config.history_capacity),
        notifications: notify_tx,
        spill: Arc::clone(&spill),
        now: 0.0,
        host,
        config,
    };

    log::info!(
        "[PlaybackEngine] Created with {} channels (max {})",
        engine.channels.current_size(),
        engine.config.pool.max_size
    );

    Ok((handle, engine, NotificationReceiver { rx: notify_rx, spill }))
}

impl PlaybackEngine {
    /// Another thread-safe handle to this engine
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            commands: self.command_tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Make the calling thread the owner
    pub fn bind_to_current_thread(&self) {
        self.shared.owner.rebind();
    }

    pub fn is_owner_thread(&self) -> bool {
        self.shared.owner.is_current()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine clock (seconds)
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn channel_pool(&self) -> &ChannelPool {
        &self.channels
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.channels.stats()
    }

    /// Live instances (including ones fading out)
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_handles(&self) -> &[Handle] {
        &self.live
    }

    pub fn instance(&self, handle: Handle) -> Option<&EventInstance> {
        self.instances.get(handle)
    }

    /// History from oldest to newest
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.snapshot()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BANKS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn load_bank(&mut self, bank: Arc<Bank>, overwrite: bool) -> PlaybackResult<BankLoadReport> {
        self.registry.load_bank(bank, overwrite)
    }

    pub fn unload_bank(&mut self, bank: BankId) -> PlaybackResult<Arc<Bank>> {
        self.registry.unload_bank(bank)
    }

    /// Unload, then force-stop every live instance from that bank
    ///
    /// Returns the number of instances stopped.
    pub fn unload_bank_and_stop(&mut self, bank_id: BankId) -> PlaybackResult<usize> {
        let bank = self.registry.unload_bank(bank_id)?;

        let victims: Vec<Handle> = self
            .live
            .iter()
            .copied()
            .filter(|&h| {
                self.instances.get(h).is_some_and(|i| {
                    i.status().is_live()
                        && (i.bank() == Some(bank_id)
                            || i.definition().is_some_and(|d| bank.contains(d)))
                })
            })
            .collect();

        let stopped = victims
            .into_iter()
            .filter(|&h| self.force_stop(h, HistoryKind::Finished))
            .count();
        log::info!(
            "[PlaybackEngine] Unloaded bank '{}', stopped {} instances",
            bank.name,
            stopped
        );
        Ok(stopped)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PLAY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Start an event; `Handle::INVALID` on failure
    pub fn play(&mut self, event: impl Into<EventRef>, emitter: EmitterId) -> Handle {
        let result = self.try_play(event, emitter);
        Self::handle_or_invalid(result)
    }

    /// Start an event, reporting why it failed
    pub fn try_play(&mut self, event: impl Into<EventRef>, emitter: EmitterId) -> PlaybackResult<Handle> {
        self.start(event.into(), emitter, None)
    }

    /// Start an event whose channels begin at `scheduled_time`
    ///
    /// Times earlier than `now + schedule_epsilon_secs` are clamped.
    pub fn play_scheduled(
        &mut self,
        event: impl Into<EventRef>,
        emitter: EmitterId,
        scheduled_time: f64,
    ) -> Handle {
        let result = self.try_play_scheduled(event, emitter, scheduled_time);
        Self::handle_or_invalid(result)
    }

    pub fn try_play_scheduled(
        &mut self,
        event: impl Into<EventRef>,
        emitter: EmitterId,
        scheduled_time: f64,
    ) -> PlaybackResult<Handle> {
        let earliest = self.now + self.config.schedule_epsilon_secs;
        let at = if scheduled_time.is_finite() {
            scheduled_time.max(earliest)
        } else {
            earliest
        };
        self.start(event.into(), emitter, Some(at))
    }

    fn handle_or_invalid(result: PlaybackResult<Handle>) -> Handle {
        match result {
            Ok(handle) => handle,
            Err(PlaybackError::LimitExceeded { name, limit }) => {
                log::debug!("[PlaybackEngine] '{}' at instance limit {}", name, limit);
                Handle::INVALID
            }
            Err(e) => {
                log::warn!("[PlaybackEngine] Play failed: {}", e);
                Handle::INVALID
            }
        }
    }

    fn resolve(&self, event: EventRef) -> PlaybackResult<(Arc<EventDefinition>, Option<BankId>)> {
        match event {
            EventRef::Name(name) => {
                let definition = self
                    .registry
                    .lookup(&name)
                    .cloned()
                    .ok_or_else(|| PlaybackError::NotFound(name.clone()))?;
                Ok((definition, self.registry.bank_of(&name)))
            }
            EventRef::Definition(definition) => {
                let bank = self.registry.bank_of_definition(&definition);
                Ok((definition, bank))
            }
        }
    }

    fn live_instances_of(&self, definition: &Arc<EventDefinition>) -> usize {
        self.live
            .iter()
            .filter_map(|&h| self.instances.get(h))
            .filter(|i| {
                i.status().is_live() && i.definition().is_some_and(|d| Arc::ptr_eq(d, definition))
            })
            .count()
    }

    fn start(
        &mut self,
        event: EventRef,
        emitter: EmitterId,
        scheduled_at: Option<f64>,
    ) -> PlaybackResult<Handle> {
        let label = match &event {
            EventRef::Name(name) => name.clone(),
            EventRef::Definition(def) => def.name.clone(),
        };

        let (definition, bank) = match self.resolve(event) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.record(label, emitter, Handle::INVALID, HistoryKind::Failed(e.to_string()));
                return Err(e);
            }
        };

        if definition.sources.is_empty() {
            let e = PlaybackError::InvalidParameter(format!("event '{}' has no sources", label));
            self.record(label, emitter, Handle::INVALID, HistoryKind::Failed(e.to_string()));
            return Err(e);
        }

        if definition.is_limited() && self.live_instances_of(&definition) >= definition.instance_limit as usize {
            let e = PlaybackError::LimitExceeded {
                name: label.clone(),
                limit: definition.instance_limit,
            };
            self.record(label, emitter, Handle::INVALID, HistoryKind::Failed(e.to_string()));
            return Err(e);
        }

        let handle = self
            .instances
            .acquire(Arc::clone(&definition), bank, emitter, self.now);

        let mut acquired = Vec::with_capacity(definition.sources.len());
        for _ in &definition.sources {
            match self.acquire_channel(handle) {
                Some(channel) => acquired.push(channel),
                None => {
                    for channel in acquired.drain(..) {
                        self.channels.release(channel);
                    }
                    if let Some(instance) = self.instances.get_mut(handle) {
                        instance.mark_error();
                    }
                    self.instances.publish(handle);
                    self.instances.release(handle);

                    let e = PlaybackError::PoolExhausted(label.clone());
                    self.notify(handle, &label, NotificationKind::Failed);
                    self.record(label, emitter, handle, HistoryKind::Failed(e.to_string()));
                    return Err(e);
                }
            }
        }

        let clip_length = self.clip_length(&definition);
        let position = self.host.positions.position(emitter).unwrap_or([0.0; 3]);

        let Some(instance) = self.instances.get_mut(handle) else {
            return Err(PlaybackError::InvalidHandle);
        };
        instance.mark_played(acquired, clip_length, scheduled_at);
        self.instances.publish(handle);
        self.live.push(handle);

        if let Some(instance) = self.instances.get(handle) {
            if !instance.is_start_pending() {
                Self::emit_start(&mut self.actions, handle, instance, position, scheduled_at);
            }
            self.mix_state.insert(handle, MixState::of(instance));
        }

        log::debug!(
            "[PlaybackEngine] Started '{}' as {} on emitter {:?}",
            label,
            handle,
            emitter
        );
        self.record(label, emitter, handle, HistoryKind::Started);
        Ok(handle)
    }

    /// Longest source clip, if the host knows every length
    fn clip_length(&self, definition: &EventDefinition) -> Option<f64> {
        definition
            .sources
            .iter()
            .map(|s| self.host.clips.clip_info(&s.clip).map(|info| info.length_secs))
            .try_fold(0.0f64, |longest, length| length.map(|l| longest.max(l)))
    }

    /// Channel for `owner`: free-list, scan, expand, then steal
    fn acquire_channel(&mut self, owner: Handle) -> Option<ChannelId> {
        if let Some(channel) = self.channels.try_acquire(owner, self.now) {
            return Some(channel);
        }

        let candidates: Vec<StealCandidate> = self
            .live
            .iter()
            .filter_map(|&h| {
                self.instances.get(h).and_then(|i| {
                    (i.status() == InstanceStatus::Played && !i.channels().is_empty()).then(|| {
                        StealCandidate {
                            handle: h,
                            start_time: i.start_time(),
                            looping: i.is_looping(),
                        }
                    })
                })
            })
            .collect();

        let victim = select_steal_victim(candidates)?;
        log::debug!("[PlaybackEngine] Stealing channels from {}", victim);
        if !self.force_stop(victim, HistoryKind::Stolen) {
            return None;
        }
        self.channels.record_steal();
        self.channels.try_acquire(owner, self.now)
    }

    fn emit_start(
        actions: &mut Vec<PlaybackAction>,
        handle: Handle,
        instance: &EventInstance,
        position: [f32; 3],
        start_at: Option<f64>,
    ) {
        let Some(definition) = instance.definition() else {
            return;
        };
        for (index, (&channel, source)) in instance
            .channels()
            .iter()
            .zip(definition.sources.iter())
            .enumerate()
        {
            actions.push(PlaybackAction::Start {
                handle,
                channel,
                clip: source.clip.clone(),
                volume: instance.source_volume(index),
                pitch: instance.effective_pitch(),
                looping: definition.looping,
                start_at,
                position,
            });
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STOP
    // ═══════════════════════════════════════════════════════════════════════════

    /// Graceful stop (fade-out if configured). Stale handles are ignored.
    pub fn stop(&mut self, handle: Handle) -> bool {
        let Some(instance) = self.instances.get_mut(handle) else {
            return false;
        };
        if !instance.status().is_live() {
            return false;
        }
        if instance.stop_graceful() {
            return self.stop_immediate(handle);
        }
        true
    }

    /// Stop now. Idempotent: returns `false` if already stopped or stale.
    pub fn stop_immediate(&mut self, handle: Handle) -> bool {
        self.force_stop(handle, HistoryKind::Finished)
    }

    fn force_stop(&mut self, handle: Handle, kind: HistoryKind) -> bool {
        let Some(instance) = self.instances.get_mut(handle) else {
            return false;
        };
        let Some(released) = instance.stop_immediate(&mut self.channels) else {
            return false;
        };
        let name = instance.name().to_string();
        let emitter = instance.emitter();
        self.instances.publish(handle);

        for channel in released {
            self.actions.push(PlaybackAction::Stop { handle, channel });
        }
        self.notify(handle, &name, NotificationKind::Finished);
        self.record(name, emitter, handle, kind);
        true
    }

    /// Gracefully stop every live instance matching `target`
    ///
    /// Returns the number of instances asked to stop.
    pub fn stop_all(&mut self, target: StopTarget) -> usize {
        match self.try_stop_all(target) {
            Ok(count) => count,
            Err(e) => {
                log::warn!("[PlaybackEngine] stop_all: {}", e);
                0
            }
        }
    }

    /// Like `stop_all`, but an unknown name with nothing playing is `NotFound`
    pub fn try_stop_all(&mut self, target: StopTarget) -> PlaybackResult<usize> {
        let matching: Vec<Handle> = self
            .live
            .iter()
            .copied()
            .filter(|&h| {
                self.instances
                    .get(h)
                    .is_some_and(|i| i.status().is_live() && !i.is_stopping() && target.matches(i))
            })
            .collect();

        if matching.is_empty() {
            if let StopTarget::Name(name) = &target {
                if self.registry.lookup(name).is_none() {
                    return Err(PlaybackError::NotFound(name.clone()));
                }
            }
        }

        Ok(matching.into_iter().filter(|&h| self.stop(h)).count())
    }

    /// Stop gracefully after `delay_secs`, unless the lifecycle ends first
    pub fn stop_after(&mut self, handle: Handle, delay_secs: f64) -> bool {
        let Some(instance) = self.instances.get(handle) else {
            return false;
        };
        if !instance.status().is_live() {
            return false;
        }
        self.deferred.push(DeferredTask {
            handle,
            due: self.now + delay_secs.max(0.0),
            token: instance.cancellation_token().clone(),
            kind: DeferredKind::StopGraceful,
        });
        true
    }

    /// Backend reports a channel reached the end of its clip
    pub fn channel_finished(&mut self, channel: ChannelId) {
        let Some(owner) = self.channels.channel(channel).and_then(|c| c.owner()) else {
            return;
        };
        let all_done = self
            .instances
            .get_mut(owner)
            .is_some_and(|i| i.channel_finished(channel));
        if all_done {
            self.stop_immediate(owner);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HANDLE ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn is_valid(&self, handle: Handle) -> bool {
        self.instances.is_valid(handle)
    }

    /// Remaining time; `Finite(0.0)` for invalid handles
    pub fn estimated_remaining_time(&self, handle: Handle) -> RemainingTime {
        match self.instances.get(handle) {
            Some(instance) if instance.status().is_live() => instance.remaining_time(self.now),
            _ => RemainingTime::Finite(0.0),
        }
    }

    pub fn cancellation_token(&self, handle: Handle) -> Option<CancellationToken> {
        self.instances
            .get(handle)
            .filter(|i| i.status().is_live())
            .map(|i| i.cancellation_token().clone())
    }

    fn live_instance_mut(&mut self, handle: Handle) -> PlaybackResult<&mut EventInstance> {
        self.instances
            .get_mut(handle)
            .filter(|i| i.status().is_live())
            .ok_or(PlaybackError::InvalidHandle)
    }

    pub fn set_pitch(&mut self, handle: Handle, pitch: f32) -> PlaybackResult<()> {
        self.live_instance_mut(handle)?.set_pitch(pitch)
    }

    pub fn set_volume(&mut self, handle: Handle, volume: f32) -> PlaybackResult<()> {
        self.live_instance_mut(handle)?.set_volume(volume)
    }

    pub fn set_instance_parameter(
        &mut self,
        handle: Handle,
        name: impl Into<String>,
        value: f32,
    ) -> PlaybackResult<()> {
        self.live_instance_mut(handle)?.set_parameter(name, value);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PARAMETERS / MIXER
    // ═══════════════════════════════════════════════════════════════════════════

    /// Global parameter read by every binding with this name
    pub fn set_parameter(&mut self, name: impl Into<String>, value: f32) {
        self.parameters.insert(name.into(), value);
    }

    pub fn parameter(&self, name: &str) -> Option<f32> {
        self.parameters.get(name).copied()
    }

    pub fn set_mixer_volume(&self, name: &str, value: f32) {
        self.host.mixer.set_volume(name, value);
    }

    pub fn mixer_volume(&self, name: &str) -> Option<f32> {
        self.host.mixer.volume(name)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TICK
    // ═══════════════════════════════════════════════════════════════════════════

    /// Advance the engine by `dt` seconds
    ///
    /// Call from the owner thread's scheduler loop. Returns the actions the
    /// rendering backend must apply.
    pub fn tick(&mut self, dt: f64) -> Vec<PlaybackAction> {
        debug_assert!(self.is_owner_thread(), "PlaybackEngine ticked off its owner thread");
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };

        self.now += dt;
        let settled = self.live.clone();

        let batch = self.commands.take(self.config.command_budget);
        for command in batch {
            command(self);
        }

        self.run_deferred();
        self.tick_instances(dt, &settled);
        self.cleanup();
        self.channels.try_shrink(self.now);

        self.shared.live_count.store(self.live.len(), Ordering::Relaxed);
        self.shared.now_bits.store(self.now.to_bits(), Ordering::Relaxed);

        std::mem::take(&mut self.actions)
    }

    /// Actions produced by owner-path calls since the last tick
    pub fn take_actions(&mut self) -> Vec<PlaybackAction> {
        std::mem::take(&mut self.actions)
    }

    fn run_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        let now = self.now;
        let (due, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.deferred).into_iter().partition(|t| t.due <= now);
        self.deferred = pending;

        for task in due {
            if task.token.is_cancelled() || !self.instances.is_valid(task.handle) {
                log::debug!("[PlaybackEngine] Deferred task for {} cancelled", task.handle);
                continue;
            }
            match task.kind {
                DeferredKind::StopGraceful => {
                    self.stop(task.handle);
                }
            }
        }
    }

    fn tick_instances(&mut self, dt: f64, handles: &[Handle]) {
        let ctx = TickContext {
            now: self.now,
            host: &self.host,
            parameters: &self.parameters,
        };
        let mut finished = Vec::new();

        for &handle in handles {
            let Some(instance) = self.instances.get_mut(handle) else {
                continue;
            };
            if instance.status() != InstanceStatus::Played {
                continue;
            }

            let outcome = instance.tick(dt, &ctx);
            if outcome.finished {
                finished.push(handle);
                continue;
            }

            if outcome.started {
                Self::emit_start(&mut self.actions, handle, instance, instance.position(), None);
            }

            let mix = MixState::of(instance);
            let changed = self.mix_state.get(&handle) != Some(&mix);
            if changed && !instance.is_start_pending() {
                if let Some(definition) = instance.definition() {
                    for (index, &channel) in instance.channels().iter().enumerate() {
                        let weight = definition.sources.get(index).map_or(1.0, |s| s.weight);
                        self.actions.push(PlaybackAction::Update {
                            handle,
                            channel,
                            volume: mix.volume * weight,
                            pitch: mix.pitch,
                            position: mix.position,
                        });
                    }
                }
                self.mix_state.insert(handle, mix);
            }
        }

        for handle in finished {
            self.force_stop(handle, HistoryKind::Finished);
        }
    }

    /// Return stopped instances to the pool
    fn cleanup(&mut self) {
        let instances = &mut self.instances;
        let mix_state = &mut self.mix_state;
        self.live.retain(|&handle| {
            let stopped = instances
                .get(handle)
                .is_none_or(|i| i.status().is_terminal());
            if stopped {
                instances.release(handle);
                mix_state.remove(&handle);
            }
            !stopped
        });
    }

    fn notify(&mut self, handle: Handle, name: &str, kind: NotificationKind) {
        let notification = Notification {
            handle,
            name: name.to_string(),
            kind,
        };
        let mut spill = self.spill.lock();
        if !spill.is_empty() {
            spill.push_back(notification);
            return;
        }
        if let Err(PushError::Full(notification)) = self.notifications.push(notification) {
            log::debug!("[PlaybackEngine] Notification ring full, spilling {} for {}", name, handle);
            spill.push_back(notification);
        }
    }

    fn record(&mut self, name: String, emitter: EmitterId, handle: Handle, kind: HistoryKind) {
        self.history.push(HistoryEntry {
            time: self.now,
            name,
            emitter,
            handle,
            kind,
        });
    }

    /// Force-stop everything and recycle all instances
    ///
    /// Queued commands are discarded. Returns the final backend actions.
    pub fn shutdown(&mut self) -> Vec<PlaybackAction> {
        let discarded = self.commands.take(usize::MAX).len();
        if discarded > 0 {
            log::debug!("[PlaybackEngine] Discarded {} queued commands", discarded);
        }
        self.deferred.clear();
        for handle in self.live.clone() {
            self.force_stop(handle, HistoryKind::Finished);
        }
        self.cleanup();
        self.shared.live_count.store(0, Ordering::Relaxed);
        log::info!("[PlaybackEngine] Shut down");
        std::mem::take(&mut self.actions)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
