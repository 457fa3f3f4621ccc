//! Playback Channel
//!
//! One addressable physical playback slot. Holds identity and occupancy
//! only; the rendering backend maps `ChannelId` to its own voice.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::instance_pool::Handle;

/// Channel identifier, unique for the lifetime of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// A single playback slot owned by the `ChannelPool`
#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    busy: bool,
    owner: Option<Handle>,
}

impl Channel {
    pub(crate) fn new(id: ChannelId) -> Self {
        Self {
            id,
            busy: false,
            owner: None,
        }
    }

    #[inline]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Instance currently playing on this channel
    #[inline]
    pub fn owner(&self) -> Option<Handle> {
        self.owner
    }

    pub(crate) fn assign(&mut self, owner: Handle) {
        self.busy = true;
        self.owner = Some(owner);
    }

    pub(crate) fn clear(&mut self) {
        self.busy = false;
        self.owner = None;
    }
}
