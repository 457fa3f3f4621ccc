//! FluxForge Pooled Event Playback
//!
//! Low-latency playback engine for short, frequently triggered sounds:
//! - Pre-allocated channel pool with bounded growth, idle shrink and stealing
//! - Generation-checked `Handle`s into a recycled `EventInstance` pool
//! - Owner-thread execution with a budgeted cross-thread command queue
//! - Banks of named event definitions
//! - Bounded playback history for diagnostics
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                   PLAYBACK ENGINE ARCHITECTURE                    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │   Any Thread                          Owner Thread                │
//! │   ┌──────────────────┐               ┌──────────────────────┐    │
//! │   │ EngineHandle     │               │ PlaybackEngine       │    │
//! │   │ .play()          │───Command────▶│ .tick(dt)            │    │
//! │   │ .stop()          │   Queue       │  1. drain (budget)   │    │
//! │   │ .load_bank()     │  (MPSC)       │  2. deferred tasks   │    │
//! │   │ .is_valid()  ◀───┼──SlotTable────│  3. tick instances   │    │
//! │   └──────────────────┘               │  4. recycle stopped  │    │
//! │                                      │  5. shrink pool      │    │
//! │   ┌──────────────────┐               └──────────┬───────────┘    │
//! │   │ Notification     │◀──────rtrb ring──────────┤                │
//! │   │ Receiver         │                          ▼                │
//! │   └──────────────────┘               Vec<PlaybackAction>         │
//! │                                      (Start / Update / Stop)     │
//! │                                                                   │
//! │   EventRegistry ── name ──▶ EventDefinition (Arc, from Bank)      │
//! │   ChannelPool   ── free-list ▶ scan ▶ expand ▶ steal              │
//! │   EventInstancePool ── slot + generation ──▶ Handle               │
//! │                                                                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use rf_playback::{
//!     Bank, EmitterId, EngineConfig, EventDefinition, Host, SourceClip, create_engine,
//! };
//!
//! let (handle, mut engine, mut notifications) =
//!     create_engine(EngineConfig::default(), Host::default()).unwrap();
//!
//! let bank = Bank::new("Weapons")
//!     .with_event(EventDefinition::new("Gunshot").with_source(SourceClip::new("gunshot_01")));
//! engine.load_bank(bank.into_shared(), false).unwrap();
//!
//! // Owner thread: real handle right away
//! let shot = engine.play("Gunshot", EmitterId(1));
//! assert!(engine.is_valid(shot));
//!
//! // Other threads: queued until the next tick
//! handle.play("Gunshot", EmitterId(2));
//!
//! let actions = engine.tick(1.0 / 60.0);
//! assert_eq!(actions.len(), 2);
//!
//! engine.stop(shot);
//! assert_eq!(notifications.drain().len(), 1);
//! ```

#![allow(clippy::new_without_default)]

pub mod channel;
pub mod channel_pool;
pub mod command;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod history;
pub mod host;
pub mod instance;
pub mod instance_pool;
pub mod registry;

// Re-exports
pub use channel::{Channel, ChannelId};
pub use channel_pool::{ChannelPool, PoolStats, StealCandidate, select_steal_victim};
pub use command::{Command, CommandQueue, CommandSender, OwnerThread};
pub use config::{
    DEFAULT_COMMAND_BUDGET, DEFAULT_HISTORY_CAPACITY, DEFAULT_NOTIFICATION_CAPACITY,
    DeviceProfile, EngineConfig, PoolConfig,
};
pub use definition::{
    Bank, BankId, EventDefinition, ParameterBinding, ParameterTarget, SourceClip,
};
pub use engine::{
    EngineHandle, EventRef, Notification, NotificationKind, NotificationReceiver,
    PendingPlay, PlaybackAction, PlaybackEngine, StopTarget, create_engine,
};
pub use error::{PlaybackError, PlaybackResult};
pub use history::{HistoryEntry, HistoryKind, HistoryRing};
pub use host::{
    ClipInfo, ClipInfoProvider, ClipTable, Host, MixerControl, MixerTable, NullHost,
    PositionProvider, ResponseCurve,
};
pub use instance::{
    CancellationToken, EmitterId, EventInstance, GLOBAL_EMITTER, InstanceStatus, RemainingTime,
};
pub use instance_pool::{EventInstancePool, Handle, SlotTable};
pub use registry::{BankLoadReport, EventRegistry};
