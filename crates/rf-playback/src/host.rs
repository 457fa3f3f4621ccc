//! Host Collaborators
//!
//! Interfaces the engine consumes from the embedding application. The host
//! implements what it has and injects it; missing capabilities fall back to
//! the null implementations here.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::instance::EmitterId;

/// Emitter position source (scene / transform system)
pub trait PositionProvider: Send + Sync {
    /// Current world position, or `None` if the emitter no longer exists
    fn position(&self, emitter: EmitterId) -> Option<[f32; 3]>;
}

/// Static information about a clip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipInfo {
    pub length_secs: f64,
    pub channel_count: u16,
}

/// Clip metadata source, used for remaining-time estimates
pub trait ClipInfoProvider: Send + Sync {
    fn clip_info(&self, clip: &str) -> Option<ClipInfo>;
}

/// Named mixer volume control
pub trait MixerControl: Send + Sync {
    fn set_volume(&self, name: &str, value: f32);
    fn volume(&self, name: &str) -> Option<f32>;
}

/// Response curve evaluation for parameter bindings
pub trait ResponseCurve: Send + Sync {
    /// Map a parameter value through the named curve
    fn evaluate(&self, curve: &str, value: f32) -> f32;
}

// ═══════════════════════════════════════════════════════════════════════════════
// NULL IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Host without a scene, clip metadata, mixer or curves
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl PositionProvider for NullHost {
    fn position(&self, _emitter: EmitterId) -> Option<[f32; 3]> {
        Some([0.0; 3])
    }
}

impl ClipInfoProvider for NullHost {
    fn clip_info(&self, _clip: &str) -> Option<ClipInfo> {
        None
    }
}

impl MixerControl for NullHost {
    fn set_volume(&self, _name: &str, _value: f32) {}

    fn volume(&self, _name: &str) -> Option<f32> {
        None
    }
}

impl ResponseCurve for NullHost {
    fn evaluate(&self, _curve: &str, value: f32) -> f32 {
        value
    }
}

/// In-memory clip table, handy for hosts that know lengths up front
#[derive(Debug, Default)]
pub struct ClipTable {
    clips: RwLock<HashMap<String, ClipInfo>>,
}

impl ClipTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, clip: impl Into<String>, length_secs: f64, channel_count: u16) {
        self.clips.write().insert(
            clip.into(),
            ClipInfo {
                length_secs,
                channel_count,
            },
        );
    }

    pub fn remove(&self, clip: &str) {
        self.clips.write().remove(clip);
    }
}

impl ClipInfoProvider for ClipTable {
    fn clip_info(&self, clip: &str) -> Option<ClipInfo> {
        self.clips.read().get(clip).copied()
    }
}

/// In-memory mixer volume table
#[derive(Debug, Default)]
pub struct MixerTable {
    volumes: RwLock<HashMap<String, f32>>,
}

impl MixerTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MixerControl for MixerTable {
    fn set_volume(&self, name: &str, value: f32) {
        self.volumes.write().insert(name.to_string(), value);
    }

    fn volume(&self, name: &str) -> Option<f32> {
        self.volumes.read().get(name).copied()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST BUNDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Collaborators injected into the engine
#[derive(Clone)]
pub struct Host {
    pub positions: Arc<dyn PositionProvider>,
    pub clips: Arc<dyn ClipInfoProvider>,
    pub mixer: Arc<dyn MixerControl>,
    pub curves: Arc<dyn ResponseCurve>,
}

impl Default for Host {
    fn default() -> Self {
        Self {
            positions: Arc::new(NullHost),
            clips: Arc::new(NullHost),
            mixer: Arc::new(NullHost),
            curves: Arc::new(NullHost),
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}

impl Host {
    pub fn with_positions(mut self, positions: Arc<dyn PositionProvider>) -> Self {
        self.positions = positions;
        self
    }

    pub fn with_clips(mut self, clips: Arc<dyn ClipInfoProvider>) -> Self {
        self.clips = clips;
        self
    }

    pub fn with_mixer(mut self, mixer: Arc<dyn MixerControl>) -> Self {
        self.mixer = mixer;
        self
    }

    pub fn with_curves(mut self, curves: Arc<dyn ResponseCurve>) -> Self {
        self.curves = curves;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_host_defaults() {
        let host = Host::default();
        assert_eq!(host.positions.position(EmitterId(1)), Some([0.0; 3]));
        assert!(host.clips.clip_info("x").is_none());
        assert_eq!(host.curves.evaluate("any", 0.25), 0.25);
        assert!(host.mixer.volume("Music").is_none());
    }

    #[test]
    fn test_tables() {
        let clips = ClipTable::new();
        clips.insert("hit", 0.5, 2);
        assert_eq!(clips.clip_info("hit").unwrap().length_secs, 0.5);
        clips.remove("hit");
        assert!(clips.clip_info("hit").is_none());

        let mixer = MixerTable::new();
        mixer.set_volume("Music", 0.3);
        assert_eq!(mixer.volume("Music"), Some(0.3));
    }
}
