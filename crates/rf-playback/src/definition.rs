//! Event Definitions and Banks
//!
//! Authored, read-only content. An `EventDefinition` describes what to play;
//! a `Bank` groups definitions so they load and unload as a unit.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::PlaybackResult;

// ═══════════════════════════════════════════════════════════════════════════════
// BANK ID GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Runtime identity of a bank instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BankId(pub u32);

/// Global bank ID counter
static NEXT_BANK_ID: AtomicU32 = AtomicU32::new(1);

/// Generate unique bank ID
pub fn generate_bank_id() -> BankId {
    BankId(NEXT_BANK_ID.fetch_add(1, Ordering::Relaxed))
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCES AND PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// One clip layer of an event; occupies one channel while playing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceClip {
    /// Clip identifier understood by the clip provider and backend
    pub clip: String,
    /// Mix weight applied to this layer's volume
    #[serde(default = "default_unit")]
    pub weight: f32,
}

impl SourceClip {
    pub fn new(clip: impl Into<String>) -> Self {
        Self {
            clip: clip.into(),
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }
}

/// What a parameter binding scales
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ParameterTarget {
    #[default]
    Volume = 0,
    Pitch = 1,
}

/// Maps a named runtime parameter onto a volume or pitch scalar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBinding {
    /// Parameter name (global or per-instance)
    pub parameter: String,
    #[serde(default)]
    pub target: ParameterTarget,
    /// Response curve name; `None` uses the raw value as the scalar
    #[serde(default)]
    pub curve: Option<String>,
    /// Value used until the parameter is set
    #[serde(default = "default_unit")]
    pub default_value: f32,
}

impl ParameterBinding {
    pub fn new(parameter: impl Into<String>, target: ParameterTarget) -> Self {
        Self {
            parameter: parameter.into(),
            target,
            curve: None,
            default_value: 1.0,
        }
    }

    pub fn with_curve(mut self, curve: impl Into<String>) -> Self {
        self.curve = Some(curve.into());
        self
    }

    pub fn with_default(mut self, value: f32) -> Self {
        self.default_value = value;
        self
    }
}

fn default_unit() -> f32 {
    1.0
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT DEFINITION
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable description of a playable event
///
/// ## Example
///
/// ```rust
/// use rf_playback::{EventDefinition, SourceClip};
///
/// let hit = EventDefinition::new("Hit")
///     .with_source(SourceClip::new("hit_01"))
///     .with_instance_limit(4)
///     .with_fades(0.0, 0.25);
///
/// assert_eq!(hit.sources.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventDefinition {
    /// Lookup name
    pub name: String,
    /// Maximum simultaneous live instances (0 = unlimited)
    pub instance_limit: u32,
    /// Group used by `StopTarget::Group`
    pub group_id: u32,
    /// Fade-in duration (seconds)
    pub fade_in_secs: f64,
    /// Fade-out duration used by graceful stops (seconds)
    pub fade_out_secs: f64,
    /// Loop sources until stopped
    pub looping: bool,
    /// Delay between play and the start of sample playback (seconds)
    pub start_delay_secs: f64,
    /// Base volume (linear)
    pub volume: f32,
    /// Base pitch (playback rate)
    pub pitch: f32,
    /// Parameter-driven scalars
    pub parameters: Vec<ParameterBinding>,
    /// Clip layers
    pub sources: Vec<SourceClip>,
}

impl Default for EventDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            instance_limit: 0,
            group_id: 0,
            fade_in_secs: 0.0,
            fade_out_secs: 0.0,
            looping: false,
            start_delay_secs: 0.0,
            volume: 1.0,
            pitch: 1.0,
            parameters: Vec::new(),
            sources: Vec::new(),
        }
    }
}

impl EventDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    // === Builder methods ===

    pub fn with_source(mut self, source: SourceClip) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_instance_limit(mut self, limit: u32) -> Self {
        self.instance_limit = limit;
        self
    }

    pub fn with_group(mut self, group_id: u32) -> Self {
        self.group_id = group_id;
        self
    }

    pub fn with_fades(mut self, fade_in_secs: f64, fade_out_secs: f64) -> Self {
        self.fade_in_secs = fade_in_secs.max(0.0);
        self.fade_out_secs = fade_out_secs.max(0.0);
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_start_delay(mut self, delay_secs: f64) -> Self {
        self.start_delay_secs = delay_secs.max(0.0);
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn with_parameter(mut self, binding: ParameterBinding) -> Self {
        self.parameters.push(binding);
        self
    }

    /// Wrap for sharing
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    #[inline]
    pub fn is_limited(&self) -> bool {
        self.instance_limit > 0
    }
}

/// A clone is a separate bank: it shares the definitions but gets its own id
impl Clone for Bank {
    fn clone(&self) -> Self {
        Self {
            id: generate_bank_id(),
            name: self.name.clone(),
            events: self.events.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BANK
// ═══════════════════════════════════════════════════════════════════════════════

/// Named collection of event definitions, loaded and unloaded as a unit
#[derive(Debug, Serialize, Deserialize)]
pub struct Bank {
    /// Runtime identity; a fresh id per constructed bank
    #[serde(skip, default = "generate_bank_id")]
    id: BankId,
    pub name: String,
    #[serde(default)]
    pub events: Vec<Arc<EventDefinition>>,
}

impl Bank {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: generate_bank_id(),
            name: name.into(),
            events: Vec::new(),
        }
    }

    /// Parse authored bank content
    pub fn from_json(json: &str) -> PlaybackResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> PlaybackResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[inline]
    pub fn id(&self) -> BankId {
        self.id
    }

    pub fn with_event(mut self, event: EventDefinition) -> Self {
        self.events.push(Arc::new(event));
        self
    }

    pub fn add_event(&mut self, event: Arc<EventDefinition>) {
        self.events.push(event);
    }

    /// Whether this exact definition instance belongs to the bank
    pub fn contains(&self, definition: &Arc<EventDefinition>) -> bool {
        self.events.iter().any(|e| Arc::ptr_eq(e, definition))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_builder() {
        let def = EventDefinition::new("Music")
            .with_source(SourceClip::new("theme").with_weight(0.5))
            .with_looping(true)
            .with_group(3)
            .with_fades(1.0, -2.0)
            .with_parameter(ParameterBinding::new("Intensity", ParameterTarget::Volume));

        assert_eq!(def.name, "Music");
        assert!(def.looping);
        assert_eq!(def.group_id, 3);
        assert_eq!(def.fade_out_secs, 0.0, "negative fades clamp to zero");
        assert_eq!(def.sources[0].weight, 0.5);
        assert!(!def.is_limited());
    }

    #[test]
    fn test_bank_ids_unique() {
        let a = Bank::new("A");
        let b = Bank::new("A");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_bank_clone_gets_fresh_id() {
        let original = Bank::new("A").with_event(EventDefinition::new("Hit"));
        let copy = original.clone();

        assert_ne!(copy.id(), original.id());
        assert_eq!(copy.name, original.name);
        assert!(copy.contains(&original.events[0]));
    }

    #[test]
    fn test_bank_from_json() {
        let json = r#"{
            "name": "Combat",
            "events": [
                { "name": "Hit", "instance_limit": 2, "sources": [ { "clip": "hit_01" } ] },
                { "name": "Loop", "looping": true, "fade_out_secs": 1.5,
                  "parameters": [ { "parameter": "Speed", "target": "Pitch", "curve": "lin" } ],
                  "sources": [ { "clip": "engine", "weight": 0.8 } ] }
            ]
        }"#;

        let bank = Bank::from_json(json).unwrap();
        assert_eq!(bank.name, "Combat");
        assert_eq!(bank.len(), 2);
        assert_eq!(bank.events[0].instance_limit, 2);
        assert_eq!(bank.events[0].volume, 1.0);
        assert_eq!(bank.events[0].sources[0].weight, 1.0);
        assert_eq!(bank.events[1].parameters[0].target, ParameterTarget::Pitch);
        assert_eq!(bank.events[1].parameters[0].default_value, 1.0);

        let again = Bank::from_json(json).unwrap();
        assert_ne!(bank.id(), again.id(), "each parsed bank is a new instance");
    }

    #[test]
    fn test_bank_contains_by_identity() {
        let bank = Bank::new("B").with_event(EventDefinition::new("X"));
        let same = Arc::clone(&bank.events[0]);
        let lookalike = Arc::new(EventDefinition::new("X"));

        assert!(bank.contains(&same));
        assert!(!bank.contains(&lookalike));
    }
}
