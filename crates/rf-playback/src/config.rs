//! Engine and Pool Configuration
//!
//! Plain, immutable configuration passed in at construction. Sizing is
//! tiered by device profile; the pool itself only sees the numbers.

use serde::{Deserialize, Serialize};

use crate::error::{PlaybackError, PlaybackResult};

// ═══════════════════════════════════════════════════════════════════════════════
// DEVICE PROFILE
// ═══════════════════════════════════════════════════════════════════════════════

/// Hardware tier used to pick default pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceProfile {
    /// Low-memory / mobile class hardware
    Constrained = 0,
    /// Typical desktop
    #[default]
    Standard = 1,
    /// Workstations and consoles with large voice budgets
    HighCapacity = 2,
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOL CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Channel pool sizing and shrink policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Channels allocated at construction; the pool never shrinks below this
    pub initial_size: usize,
    /// Hard upper bound on channels
    pub max_size: usize,
    /// Channels added per expansion
    pub expansion_increment: usize,
    /// Usage ratio (in_use / current) at or above which the pool counts as busy
    pub shrink_usage_threshold: f32,
    /// Seconds the pool must stay below the threshold before shrinking
    pub shrink_idle_secs: f64,
    /// Minimum seconds between two shrink steps
    pub shrink_interval_secs: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_profile(DeviceProfile::Standard)
    }
}

impl PoolConfig {
    /// Default sizing for a device tier
    pub fn for_profile(profile: DeviceProfile) -> Self {
        let (initial_size, max_size, expansion_increment) = match profile {
            DeviceProfile::Constrained => (8, 24, 2),
            DeviceProfile::Standard => (16, 64, 4),
            DeviceProfile::HighCapacity => (32, 128, 8),
        };

        Self {
            initial_size,
            max_size,
            expansion_increment,
            shrink_usage_threshold: 0.5,
            shrink_idle_secs: 10.0,
            shrink_interval_secs: 1.0,
        }
    }

    /// Explicit sizing, default shrink policy
    pub fn with_sizes(initial_size: usize, max_size: usize, expansion_increment: usize) -> Self {
        Self {
            initial_size,
            max_size,
            expansion_increment,
            ..Default::default()
        }
    }

    /// Set shrink policy
    pub fn with_shrink_policy(mut self, usage_threshold: f32, idle_secs: f64, interval_secs: f64) -> Self {
        self.shrink_usage_threshold = usage_threshold;
        self.shrink_idle_secs = idle_secs;
        self.shrink_interval_secs = interval_secs;
        self
    }

    /// Check sizing invariants
    pub fn validate(&self) -> PlaybackResult<()> {
        if self.max_size == 0 {
            return Err(PlaybackError::InvalidParameter(
                "pool max_size must be at least 1".into(),
            ));
        }
        if self.initial_size > self.max_size {
            return Err(PlaybackError::InvalidParameter(format!(
                "pool initial_size {} exceeds max_size {}",
                self.initial_size, self.max_size
            )));
        }
        if self.expansion_increment == 0 {
            return Err(PlaybackError::InvalidParameter(
                "pool expansion_increment must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.shrink_usage_threshold) {
            return Err(PlaybackError::InvalidParameter(format!(
                "shrink_usage_threshold {} outside [0, 1]",
                self.shrink_usage_threshold
            )));
        }
        if self.shrink_idle_secs < 0.0 || self.shrink_interval_secs < 0.0 {
            return Err(PlaybackError::InvalidParameter(
                "shrink timings must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Default per-tick command budget
pub const DEFAULT_COMMAND_BUDGET: usize = 10;

/// Default history ring capacity
pub const DEFAULT_HISTORY_CAPACITY: usize = 300;

/// Default notification ring capacity
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1024;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Channel pool sizing
    pub pool: PoolConfig,
    /// Commands executed per tick at most
    pub command_budget: usize,
    /// Entries kept in the diagnostics history
    pub history_capacity: usize,
    /// Capacity of the completion notification ring
    pub notification_capacity: usize,
    /// Minimum lead time for scheduled playback (seconds)
    pub schedule_epsilon_secs: f64,
    /// Instance slots reserved up front
    pub initial_instance_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            command_budget: DEFAULT_COMMAND_BUDGET,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            schedule_epsilon_secs: 0.01,
            initial_instance_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Defaults for a device tier
    pub fn for_profile(profile: DeviceProfile) -> Self {
        Self {
            pool: PoolConfig::for_profile(profile),
            ..Default::default()
        }
    }

    /// Replace pool config
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set command budget
    pub fn with_command_budget(mut self, budget: usize) -> Self {
        self.command_budget = budget;
        self
    }

    /// Set history capacity
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Parse from JSON; missing fields take defaults
    pub fn from_json(json: &str) -> PlaybackResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> PlaybackResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check all invariants
    pub fn validate(&self) -> PlaybackResult<()> {
        self.pool.validate()?;
        if self.command_budget == 0 {
            return Err(PlaybackError::InvalidParameter(
                "command_budget must be at least 1".into(),
            ));
        }
        if self.history_capacity == 0 || self.notification_capacity == 0 {
            return Err(PlaybackError::InvalidParameter(
                "history and notification capacities must be non-zero".into(),
            ));
        }
        if self.schedule_epsilon_secs < 0.0 {
            return Err(PlaybackError::InvalidParameter(
                "schedule_epsilon_secs must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
