//! Event Instance
//!
//! Mutable runtime state of one playback of an `EventDefinition`.
//!
//! ```text
//! Initialized ──play──▶ Played ──stop──▶ Stopped
//!      │                                   ▲
//!      └──────── no channels ──▶ Error     │ (fade-out completes)
//! ```
//!
//! `Stopped` and `Error` are terminal until the pool recycles the instance,
//! which restarts it at `Initialized` under a new generation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::channel::ChannelId;
use crate::channel_pool::ChannelPool;
use crate::definition::{BankId, EventDefinition, ParameterTarget};
use crate::error::{PlaybackError, PlaybackResult};
use crate::host::Host;

// ═══════════════════════════════════════════════════════════════════════════════
// IDS AND STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Emitter (game object) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EmitterId(pub u64);

/// Emitter used for non-positional playback
pub const GLOBAL_EMITTER: EmitterId = EmitterId(0);

/// Lifecycle status of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum InstanceStatus {
    /// Set up from a definition, not yet playing
    #[default]
    Initialized = 0,
    /// Channels acquired, ticking
    Played = 1,
    /// Finished; channels released
    Stopped = 2,
    /// Play request failed
    Error = 3,
}

impl InstanceStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Stopped | InstanceStatus::Error)
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

/// Estimated time left for an instance
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemainingTime {
    Finite(f64),
    /// Looping events never end on their own
    Unbounded,
    /// Clip lengths unknown to the host
    Unknown,
}

impl RemainingTime {
    pub fn as_secs(&self) -> Option<f64> {
        match self {
            RemainingTime::Finite(secs) => Some(*secs),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CANCELLATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Cooperative cancellation flag for work tied to one instance lifecycle
///
/// Set when the instance stops. A recycled instance gets a fresh token, so
/// tokens held by stale work stay cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FADE
// ═══════════════════════════════════════════════════════════════════════════════

/// Linear fade of the instance gain
#[derive(Debug, Clone, Copy)]
struct Fade {
    from: f32,
    to: f32,
    duration: f64,
    elapsed: f64,
}

impl Fade {
    fn new(from: f32, to: f32, duration: f64) -> Self {
        Self {
            from,
            to,
            duration,
            elapsed: 0.0,
        }
    }

    /// Advance; returns true once the target is reached
    fn advance(&mut self, dt: f64) -> bool {
        self.elapsed += dt;
        self.elapsed >= self.duration
    }

    fn value(&self) -> f32 {
        if self.duration <= 0.0 {
            return self.to;
        }
        let t = (self.elapsed / self.duration).clamp(0.0, 1.0) as f32;
        self.from + (self.to - self.from) * t
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TICK CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Settled engine state an instance reads while ticking
pub(crate) struct TickContext<'a> {
    pub now: f64,
    pub host: &'a Host,
    pub parameters: &'a HashMap<String, f32>,
}

/// What the engine must do after an instance tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TickOutcome {
    /// Start delay elapsed: channels should begin playback now
    pub started: bool,
    /// Instance must be stopped immediately
    pub finished: bool,
    /// Emitter vanished this tick
    pub emitter_lost: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// One live playback of an event definition
#[derive(Debug, Default)]
pub struct EventInstance {
    definition: Option<Arc<EventDefinition>>,
    bank: Option<BankId>,
    emitter: EmitterId,
    status: InstanceStatus,
    channels: Vec<ChannelId>,
    /// Per-channel natural-end flags, indexed like `channels`
    ended_channels: Vec<bool>,
    base_volume: f32,
    base_pitch: f32,
    volume_scalar: f32,
    pitch_scalar: f32,
    pitch_rejected: bool,
    fade_gain: f32,
    fade: Option<Fade>,
    stopping: bool,
    elapsed: f64,
    start_delay: f64,
    scheduled_at: Option<f64>,
    playback_position: f64,
    clip_length: Option<f64>,
    start_time: f64,
    generation: u32,
    cancel: CancellationToken,
    completion_fired: bool,
    parameters: HashMap<String, f32>,
    position: [f32; 3],
}

impl EventInstance {
    /// Blank pooled instance
    pub(crate) fn new() -> Self {
        Self {
            base_volume: 1.0,
            base_pitch: 1.0,
            volume_scalar: 1.0,
            pitch_scalar: 1.0,
            fade_gain: 1.0,
            ..Default::default()
        }
    }

    /// Initialize from a definition for a new lifecycle
    ///
    /// Generation is managed by the pool and left untouched.
    pub(crate) fn begin(
        &mut self,
        definition: Arc<EventDefinition>,
        bank: Option<BankId>,
        emitter: EmitterId,
        now: f64,
    ) {
        self.bank = bank;
        self.emitter = emitter;
        self.status = InstanceStatus::Initialized;
        self.base_volume = definition.volume;
        self.base_pitch = if definition.pitch > 0.0 && definition.pitch.is_finite() {
            definition.pitch
        } else {
            log::warn!(
                "[EventInstance] '{}' has invalid pitch {}, using 1.0",
                definition.name,
                definition.pitch
            );
            1.0
        };
        self.volume_scalar = 1.0;
        self.pitch_scalar = 1.0;
        self.pitch_rejected = false;
        self.start_delay = definition.start_delay_secs.max(0.0);
        self.start_time = now;
        self.cancel = CancellationToken::new();
        self.completion_fired = false;
        if definition.fade_in_secs > 0.0 {
            self.fade_gain = 0.0;
            self.fade = Some(Fade::new(0.0, 1.0, definition.fade_in_secs));
        } else {
            self.fade_gain = 1.0;
            self.fade = None;
        }
        self.definition = Some(definition);
    }

    /// Clear all mutable state; keeps the generation
    pub(crate) fn reset(&mut self) {
        let generation = self.generation;
        *self = Self::new();
        self.generation = generation;
    }

    pub(crate) fn set_generation(&mut self, generation: u32) {
        self.generation = generation;
    }

    /// Enter `Played` with the channels acquired for every source
    pub(crate) fn mark_played(
        &mut self,
        channels: Vec<ChannelId>,
        clip_length: Option<f64>,
        scheduled_at: Option<f64>,
    ) {
        debug_assert_eq!(self.status, InstanceStatus::Initialized);
        self.ended_channels = vec![false; channels.len()];
        self.channels = channels;
        self.clip_length = clip_length;
        self.scheduled_at = scheduled_at;
        self.status = InstanceStatus::Played;
    }

    /// Enter `Error`; the request acquired nothing that needs releasing
    pub(crate) fn mark_error(&mut self) {
        self.channels.clear();
        self.cancel.cancel();
        self.status = InstanceStatus::Error;
    }

    // === Accessors ===

    pub fn definition(&self) -> Option<&Arc<EventDefinition>> {
        self.definition.as_ref()
    }

    /// Event name ("" while pooled)
    pub fn name(&self) -> &str {
        self.definition.as_deref().map(|d| d.name.as_str()).unwrap_or("")
    }

    pub fn bank(&self) -> Option<BankId> {
        self.bank
    }

    pub fn emitter(&self) -> EmitterId {
        self.emitter
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn position(&self) -> [f32; 3] {
        self.position
    }

    pub fn is_looping(&self) -> bool {
        self.definition.as_ref().is_some_and(|d| d.looping)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Start delay still pending (Start not yet issued to channels)
    pub fn is_start_pending(&self) -> bool {
        self.start_delay > 0.0
    }

    pub fn scheduled_at(&self) -> Option<f64> {
        self.scheduled_at
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn fade_gain(&self) -> f32 {
        self.fade_gain
    }

    /// Base volume × parameter scalars × fade gain
    pub fn effective_volume(&self) -> f32 {
        self.base_volume * self.volume_scalar * self.fade_gain
    }

    /// Base pitch × parameter scalars
    pub fn effective_pitch(&self) -> f32 {
        self.base_pitch * self.pitch_scalar
    }

    /// Volume for one source layer
    pub fn source_volume(&self, source_index: usize) -> f32 {
        let weight = self
            .definition
            .as_ref()
            .and_then(|d| d.sources.get(source_index))
            .map(|s| s.weight)
            .unwrap_or(1.0);
        self.effective_volume() * weight
    }

    // === Mutation ===

    /// Set base pitch; rejects non-positive or non-finite values
    pub fn set_pitch(&mut self, pitch: f32) -> PlaybackResult<()> {
        if !(pitch > 0.0 && pitch.is_finite()) {
            log::warn!("[EventInstance] Rejected pitch {} on '{}'", pitch, self.name());
            return Err(PlaybackError::InvalidParameter(format!(
                "pitch must be > 0, got {}",
                pitch
            )));
        }
        self.base_pitch = pitch;
        Ok(())
    }

    /// Set base volume; rejects negative or non-finite values
    pub fn set_volume(&mut self, volume: f32) -> PlaybackResult<()> {
        if !(volume >= 0.0 && volume.is_finite()) {
            log::warn!("[EventInstance] Rejected volume {} on '{}'", volume, self.name());
            return Err(PlaybackError::InvalidParameter(format!(
                "volume must be >= 0, got {}",
                volume
            )));
        }
        self.base_volume = volume;
        Ok(())
    }

    /// Per-instance parameter override
    pub fn set_parameter(&mut self, name: impl Into<String>, value: f32) {
        self.parameters.insert(name.into(), value);
    }

    /// Begin a graceful stop
    ///
    /// Returns `true` when the caller must stop immediately (no fade-out
    /// configured). Terminal or already-stopping instances are left alone.
    pub fn stop_graceful(&mut self) -> bool {
        if self.status.is_terminal() || self.stopping {
            return false;
        }
        let fade_out = self.definition.as_ref().map_or(0.0, |d| d.fade_out_secs);
        if fade_out <= 0.0 {
            return true;
        }
        self.stopping = true;
        self.fade = Some(Fade::new(self.fade_gain, 0.0, fade_out));
        false
    }

    /// Stop now, releasing every channel back to `pool`
    ///
    /// Returns the released channels on the first call and `None` on every
    /// later call, so completion is signalled exactly once.
    pub fn stop_immediate(&mut self, pool: &mut ChannelPool) -> Option<Vec<ChannelId>> {
        if self.status.is_terminal() || self.completion_fired {
            return None;
        }
        let channels = std::mem::take(&mut self.channels);
        for &id in &channels {
            pool.release(id);
        }
        self.cancel.cancel();
        self.stopping = false;
        self.fade = None;
        self.fade_gain = 0.0;
        self.status = InstanceStatus::Stopped;
        self.completion_fired = true;
        Some(channels)
    }

    /// Backend reports that a channel finished naturally
    ///
    /// Returns `true` once every channel of the instance has ended.
    /// Repeated reports for the same channel are ignored.
    pub fn channel_finished(&mut self, channel: ChannelId) -> bool {
        if self.status != InstanceStatus::Played {
            return false;
        }
        let Some(index) = self.channels.iter().position(|&c| c == channel) else {
            return false;
        };
        let Some(ended) = self.ended_channels.get_mut(index) else {
            return false;
        };
        if std::mem::replace(ended, true) {
            log::debug!("[EventInstance] {} reported finished twice on '{}'", channel, self.name());
            return false;
        }
        self.ended_channels.iter().all(|&e| e)
    }

    // === Per-tick update ===

    /// Advance by `dt` seconds
    pub(crate) fn tick(&mut self, dt: f64, ctx: &TickContext<'_>) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.status != InstanceStatus::Played {
            return outcome;
        }

        self.elapsed += dt;

        match ctx.host.positions.position(self.emitter) {
            Some(position) => self.position = position,
            None => {
                outcome.emitter_lost = true;
                if !self.stopping {
                    log::debug!(
                        "[EventInstance] Emitter {:?} gone, stopping '{}'",
                        self.emitter,
                        self.name()
                    );
                    if self.stop_graceful() {
                        outcome.finished = true;
                        return outcome;
                    }
                }
            }
        }

        let sounding = self.advance_start(dt, ctx.now, &mut outcome);

        if let Some(fade) = self.fade.as_mut() {
            let step = if self.stopping { dt } else { sounding };
            let done = fade.advance(step);
            self.fade_gain = fade.value();
            if done {
                self.fade = None;
                if self.stopping {
                    outcome.finished = true;
                    return outcome;
                }
            }
        }

        self.apply_parameters(ctx);

        self.playback_position += sounding * self.effective_pitch() as f64;

        if let Some(length) = self.clip_length {
            if !self.is_looping() && sounding > 0.0 && self.playback_position >= length {
                outcome.finished = true;
            }
        }

        outcome
    }

    /// Consume start delay / scheduled lead; returns the sounding part of `dt`
    fn advance_start(&mut self, dt: f64, now: f64, outcome: &mut TickOutcome) -> f64 {
        if self.start_delay > 0.0 {
            self.start_delay -= dt;
            if self.start_delay > 0.0 {
                return 0.0;
            }
            let sounding = -self.start_delay;
            self.start_delay = 0.0;
            outcome.started = true;
            return sounding;
        }

        match self.scheduled_at {
            Some(at) => (now - at).clamp(0.0, dt),
            None => dt,
        }
    }

    fn apply_parameters(&mut self, ctx: &TickContext<'_>) {
        let Some(definition) = self.definition.as_ref() else {
            return;
        };
        if definition.parameters.is_empty() {
            return;
        }

        let mut volume_scalar = 1.0f32;
        let mut pitch_scalar = 1.0f32;

        for binding in &definition.parameters {
            let value = self
                .parameters
                .get(&binding.parameter)
                .or_else(|| ctx.parameters.get(&binding.parameter))
                .copied()
                .unwrap_or(binding.default_value);

            let scalar = match binding.curve.as_deref() {
                Some(curve) => ctx.host.curves.evaluate(curve, value),
                None => value,
            };

            match binding.target {
                ParameterTarget::Volume => volume_scalar *= scalar,
                ParameterTarget::Pitch => pitch_scalar *= scalar,
            }
        }

        if volume_scalar.is_finite() {
            self.volume_scalar = volume_scalar.max(0.0);
        }

        if pitch_scalar > 0.0 && pitch_scalar.is_finite() {
            self.pitch_scalar = pitch_scalar;
            self.pitch_rejected = false;
        } else if !self.pitch_rejected {
            self.pitch_rejected = true;
            log::warn!(
                "[EventInstance] Parameter pitch scalar {} rejected on '{}', keeping {}",
                pitch_scalar,
                definition.name,
                self.pitch_scalar
            );
        }
    }

    /// Remaining playback time at engine time `now`
    pub fn remaining_time(&self, now: f64) -> RemainingTime {
        if self.status.is_terminal() {
            return RemainingTime::Finite(0.0);
        }
        if self.is_looping() {
            return RemainingTime::Unbounded;
        }
        let Some(length) = self.clip_length else {
            return RemainingTime::Unknown;
        };

        let lead = self.start_delay + self.scheduled_at.map_or(0.0, |at| (at - now).max(0.0));
        let left = (length - self.playback_position).max(0.0) / self.effective_pitch() as f64;
        RemainingTime::Finite(lead + left)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
