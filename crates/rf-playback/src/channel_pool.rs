//! Channel Pool
//!
//! Bounded collection of playback channels:
//! - Free-list acquire with a linear-scan fallback
//! - Bounded growth in fixed increments up to `max_size`
//! - Idle-based shrink, one channel per step, never below `initial_size`
//! - Steal victim selection (the engine performs the actual force-stop,
//!   since live instances are not owned by the pool)
//!
//! Invariants: `initial_size <= current_size <= max_size` and
//! `available + in_use == current_size` at every observation point.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::channel::{Channel, ChannelId};
use crate::config::PoolConfig;
use crate::instance_pool::Handle;

// ═══════════════════════════════════════════════════════════════════════════════
// POOL STATS
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub initial_size: usize,
    pub current_size: usize,
    pub max_size: usize,
    pub in_use: usize,
    pub available: usize,
    pub peak_usage: usize,
    pub total_expansions: u64,
    pub total_steals: u64,
}

impl PoolStats {
    /// Fraction of channels in use (0.0 - 1.0)
    #[inline]
    pub fn usage_ratio(&self) -> f32 {
        if self.current_size == 0 {
            return 0.0;
        }
        self.in_use as f32 / self.current_size as f32
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STEAL VICTIM SELECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Live instance considered for stealing
#[derive(Debug, Clone, Copy)]
pub struct StealCandidate {
    pub handle: Handle,
    pub start_time: f64,
    pub looping: bool,
}

/// Pick the instance to force-stop when the pool is exhausted
///
/// Oldest non-looping instance wins; ties go to the earliest candidate.
/// Looping instances are never selected.
pub fn select_steal_victim(
    candidates: impl IntoIterator<Item = StealCandidate>,
) -> Option<Handle> {
    let mut victim: Option<StealCandidate> = None;

    for candidate in candidates {
        if candidate.looping {
            continue;
        }
        match victim {
            Some(current) if candidate.start_time >= current.start_time => {}
            _ => victim = Some(candidate),
        }
    }

    victim.map(|c| c.handle)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHANNEL POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Owner-thread pool of playback channels
#[derive(Debug)]
pub struct ChannelPool {
    config: PoolConfig,
    channels: Vec<Channel>,
    /// Position of each channel in `channels`
    index: HashMap<ChannelId, usize>,
    /// Free-list (popped from the back)
    available: Vec<ChannelId>,
    in_use: usize,
    next_id: u32,
    last_expansion_time: f64,
    last_high_usage_time: f64,
    last_shrink_time: f64,
    peak_usage: usize,
    total_expansions: u64,
    total_steals: u64,
}

impl ChannelPool {
    /// Create a pool with `initial_size` channels
    ///
    /// `now` seeds the idle timers, so the pool never shrinks sooner than
    /// `shrink_idle_secs` after construction.
    pub fn new(config: PoolConfig, now: f64) -> Self {
        let mut pool = Self {
            channels: Vec::with_capacity(config.max_size),
            index: HashMap::with_capacity(config.max_size),
            available: Vec::with_capacity(config.max_size),
            in_use: 0,
            next_id: 0,
            last_expansion_time: now,
            last_high_usage_time: now,
            last_shrink_time: now,
            peak_usage: 0,
            total_expansions: 0,
            total_steals: 0,
            config,
        };
        pool.grow(pool.config.initial_size);
        pool
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Current number of channels
    #[inline]
    pub fn current_size(&self) -> usize {
        self.channels.len()
    }

    /// Channels currently assigned to an instance
    #[inline]
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Channels on the free-list
    #[inline]
    pub fn available(&self) -> usize {
        self.available.len()
    }

    /// Time of the last expansion
    pub fn last_expansion_time(&self) -> f64 {
        self.last_expansion_time
    }

    /// Look up a channel
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.index.get(&id).and_then(|&pos| self.channels.get(pos))
    }

    /// All channels
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        let pos = *self.index.get(&id)?;
        self.channels.get_mut(pos)
    }

    /// Append `count` fresh channels to the pool and free-list
    fn grow(&mut self, count: usize) {
        let first = self.next_id;
        for _ in 0..count {
            let id = ChannelId(self.next_id);
            self.next_id += 1;
            self.index.insert(id, self.channels.len());
            self.channels.push(Channel::new(id));
        }
        // Lowest id is handed out first
        self.available
            .extend((first..self.next_id).rev().map(ChannelId));
    }

    fn assign(&mut self, id: ChannelId, owner: Handle) -> bool {
        let Some(channel) = self.channel_mut(id) else {
            return false;
        };
        if channel.is_busy() {
            return false;
        }
        channel.assign(owner);
        self.in_use += 1;
        self.peak_usage = self.peak_usage.max(self.in_use);
        true
    }

    /// Acquire a channel without stealing
    ///
    /// Tries the free-list, then a linear scan, then expands the pool and
    /// retries. Returns `None` when the pool is at `max_size` and full.
    pub fn try_acquire(&mut self, owner: Handle, now: f64) -> Option<ChannelId> {
        if let Some(id) = self.pop_free(owner) {
            return Some(id);
        }

        if let Some(id) = self.scan_free() {
            log::error!(
                "[ChannelPool] Free-list desync: {} was free but not listed",
                id
            );
            debug_assert!(false, "channel pool free-list desync on {}", id);
            if self.assign(id, owner) {
                return Some(id);
            }
        }

        let current = self.current_size();
        if current < self.config.max_size {
            let count = self
                .config
                .expansion_increment
                .min(self.config.max_size - current);
            self.grow(count);
            self.total_expansions += 1;
            self.last_expansion_time = now;
            self.last_high_usage_time = now;
            log::debug!(
                "[ChannelPool] Expanded by {} to {} channels (max {})",
                count,
                self.current_size(),
                self.config.max_size
            );
            return self.pop_free(owner);
        }

        None
    }

    fn pop_free(&mut self, owner: Handle) -> Option<ChannelId> {
        while let Some(id) = self.available.pop() {
            if self.assign(id, owner) {
                return Some(id);
            }
            log::warn!("[ChannelPool] Dropping stale free-list entry {}", id);
        }
        None
    }

    fn scan_free(&self) -> Option<ChannelId> {
        self.channels
            .iter()
            .find(|c| !c.is_busy() && !self.available.contains(&c.id()))
            .map(|c| c.id())
    }

    /// Return a channel to the free-list
    ///
    /// Returns `false` (and changes nothing) if the channel is unknown or
    /// already free.
    pub fn release(&mut self, id: ChannelId) -> bool {
        let Some(channel) = self.channel_mut(id) else {
            log::warn!("[ChannelPool] Release of unknown channel {}", id);
            return false;
        };
        if !channel.is_busy() {
            log::debug!("[ChannelPool] {} already free", id);
            return false;
        }
        channel.clear();
        self.in_use -= 1;
        self.available.push(id);
        true
    }

    /// Count a successful steal
    pub fn record_steal(&mut self) {
        self.total_steals += 1;
    }

    /// Shrink by one idle channel if the policy allows
    ///
    /// Returns the destroyed channel, if any.
    pub fn try_shrink(&mut self, now: f64) -> Option<ChannelId> {
        let current = self.current_size();
        if current <= self.config.initial_size {
            return None;
        }

        let usage_ratio = self.in_use as f32 / current as f32;
        if usage_ratio >= self.config.shrink_usage_threshold {
            self.last_high_usage_time = now;
            return None;
        }

        if now - self.last_high_usage_time < self.config.shrink_idle_secs
            || now - self.last_shrink_time < self.config.shrink_interval_secs
        {
            return None;
        }

        let id = self.available.pop()?;
        if let Some(pos) = self.index.remove(&id) {
            self.channels.swap_remove(pos);
            if let Some(moved) = self.channels.get(pos) {
                self.index.insert(moved.id(), pos);
            }
        }
        self.last_shrink_time = now;
        log::debug!(
            "[ChannelPool] Shrunk to {} channels (destroyed {})",
            self.current_size(),
            id
        );
        Some(id)
    }

    /// Snapshot of counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            initial_size: self.config.initial_size,
            current_size: self.current_size(),
            max_size: self.config.max_size,
            in_use: self.in_use,
            available: self.available(),
            peak_usage: self.peak_usage,
            total_expansions: self.total_expansions,
            total_steals: self.total_steals,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
