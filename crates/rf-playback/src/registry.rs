//! Event Registry
//!
//! Name → definition lookup plus bank membership. Owner-thread only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::definition::{Bank, BankId, EventDefinition};
use crate::error::{PlaybackError, PlaybackResult};

/// Outcome of loading one bank
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BankLoadReport {
    pub bank: BankId,
    /// Names newly mapped to this bank
    pub registered: Vec<String>,
    /// Names repeated inside the bank (first occurrence kept)
    pub duplicates: Vec<String>,
    /// Names already registered by another bank and left untouched
    pub collisions: Vec<String>,
    /// Names taken over from another bank (`overwrite = true`)
    pub overwritten: Vec<String>,
}

impl BankLoadReport {
    /// True if nothing was skipped
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.collisions.is_empty()
    }
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    definition: Arc<EventDefinition>,
    bank: BankId,
}

/// Name-based event lookup with bank tracking
#[derive(Debug, Default)]
pub struct EventRegistry {
    events: HashMap<String, RegistryEntry>,
    banks: HashMap<BankId, Arc<Bank>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every event of `bank`
    ///
    /// Names repeated within the bank are reported and skipped after the
    /// first. Names already owned by another bank are skipped unless
    /// `overwrite` is set.
    pub fn load_bank(&mut self, bank: Arc<Bank>, overwrite: bool) -> PlaybackResult<BankLoadReport> {
        let bank_id = bank.id();
        if self.banks.contains_key(&bank_id) {
            return Err(PlaybackError::BankAlreadyLoaded(bank.name.clone()));
        }

        let mut report = BankLoadReport {
            bank: bank_id,
            ..Default::default()
        };
        let mut seen: HashSet<&str> = HashSet::with_capacity(bank.events.len());

        for definition in &bank.events {
            let name = definition.name.as_str();

            if !seen.insert(name) {
                let err = PlaybackError::DuplicateName {
                    name: name.to_string(),
                    bank: bank.name.clone(),
                };
                log::warn!("[Registry] {}", err);
                report.duplicates.push(name.to_string());
                continue;
            }

            let entry = RegistryEntry {
                definition: Arc::clone(definition),
                bank: bank_id,
            };

            match self.events.get(name) {
                Some(existing) if !overwrite => {
                    log::warn!(
                        "[Registry] '{}' from bank '{}' collides with bank {:?}, skipped",
                        name,
                        bank.name,
                        existing.bank
                    );
                    report.collisions.push(name.to_string());
                }
                Some(_) => {
                    self.events.insert(name.to_string(), entry);
                    report.overwritten.push(name.to_string());
                }
                None => {
                    self.events.insert(name.to_string(), entry);
                    report.registered.push(name.to_string());
                }
            }
        }

        log::info!(
            "[Registry] Loaded bank '{}': {} registered, {} overwritten, {} duplicates, {} collisions",
            bank.name,
            report.registered.len(),
            report.overwritten.len(),
            report.duplicates.len(),
            report.collisions.len()
        );

        self.banks.insert(bank_id, bank);
        Ok(report)
    }

    /// Remove a bank and every mapping that still points into it
    pub fn unload_bank(&mut self, bank_id: BankId) -> PlaybackResult<Arc<Bank>> {
        let bank = self
            .banks
            .remove(&bank_id)
            .ok_or(PlaybackError::BankNotLoaded(bank_id.0))?;

        for definition in &bank.events {
            let owned_here = self.events.get(&definition.name).is_some_and(|entry| {
                entry.bank == bank_id && Arc::ptr_eq(&entry.definition, definition)
            });
            if owned_here {
                self.events.remove(&definition.name);
            }
        }

        log::info!("[Registry] Unloaded bank '{}'", bank.name);
        Ok(bank)
    }

    /// O(1) name lookup
    pub fn lookup(&self, name: &str) -> Option<&Arc<EventDefinition>> {
        self.events.get(name).map(|e| &e.definition)
    }

    /// Bank that currently owns `name`
    pub fn bank_of(&self, name: &str) -> Option<BankId> {
        self.events.get(name).map(|e| e.bank)
    }

    /// Bank that owns this exact definition instance
    pub fn bank_of_definition(&self, definition: &Arc<EventDefinition>) -> Option<BankId> {
        self.events
            .get(&definition.name)
            .filter(|e| Arc::ptr_eq(&e.definition, definition))
            .map(|e| e.bank)
    }

    pub fn bank(&self, bank_id: BankId) -> Option<&Arc<Bank>> {
        self.banks.get(&bank_id)
    }

    pub fn is_loaded(&self, bank_id: BankId) -> bool {
        self.banks.contains_key(&bank_id)
    }

    pub fn bank_count(&self) -> usize {
        self.banks.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Registered names (unordered)
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(name: &str, events: &[&str]) -> Arc<Bank> {
        let mut bank = Bank::new(name);
        for e in events {
            bank.add_event(Arc::new(EventDefinition::new(*e)));
        }
        Arc::new(bank)
    }

    fn mapping(registry: &EventRegistry) -> Vec<(String, BankId)> {
        let mut names: Vec<_> = registry
            .event_names()
            .map(|n| (n.to_string(), registry.bank_of(n).unwrap()))
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        names
    }

    #[test]
    fn test_load_and_lookup() {
        let mut registry = EventRegistry::new();
        let b = bank("Main", &["Hit", "Jump"]);
        let report = registry.load_bank(Arc::clone(&b), false).unwrap();

        assert!(report.is_clean());
        assert_eq!(report.registered.len(), 2);
        assert!(registry.lookup("Hit").is_some());
        assert_eq!(registry.bank_of("Jump"), Some(b.id()));
        assert!(registry.lookup("Missing").is_none());
    }

    #[test]
    fn test_duplicate_within_bank() {
        let mut registry = EventRegistry::new();
        let b = bank("Dup", &["Hit", "Hit"]);
        let first = Arc::clone(&b.events[0]);

        let report = registry.load_bank(b, false).unwrap();
        assert_eq!(report.duplicates, vec!["Hit".to_string()]);
        assert_eq!(registry.event_count(), 1);
        assert!(Arc::ptr_eq(registry.lookup("Hit").unwrap(), &first));
    }

    #[test]
    fn test_collision_without_overwrite() {
        let mut registry = EventRegistry::new();
        let a = bank("A", &["Hit"]);
        let b = bank("B", &["Hit", "Other"]);
        registry.load_bank(Arc::clone(&a), false).unwrap();

        let report = registry.load_bank(b, false).unwrap();
        assert_eq!(report.collisions, vec!["Hit".to_string()]);
        assert_eq!(registry.bank_of("Hit"), Some(a.id()));
        assert!(registry.lookup("Other").is_some());
    }

    #[test]
    fn test_unload_keeps_overwritten_mapping() {
        let mut registry = EventRegistry::new();
        let a = bank("A", &["Hit", "OnlyA"]);
        let b = bank("B", &["Hit"]);
        registry.load_bank(Arc::clone(&a), false).unwrap();

        let report = registry.load_bank(Arc::clone(&b), true).unwrap();
        assert_eq!(report.overwritten, vec!["Hit".to_string()]);

        registry.unload_bank(a.id()).unwrap();
        assert_eq!(registry.bank_of("Hit"), Some(b.id()), "B's mapping survives");
        assert!(registry.lookup("OnlyA").is_none());
    }

    #[test]
    fn test_load_unload_restores_mapping() {
        let mut registry = EventRegistry::new();
        registry.load_bank(bank("Base", &["A", "B"]), false).unwrap();
        let before = mapping(&registry);

        let extra = bank("Extra", &["C", "D"]);
        registry.load_bank(Arc::clone(&extra), false).unwrap();
        assert_eq!(registry.event_count(), 4);

        registry.unload_bank(extra.id()).unwrap();
        assert_eq!(mapping(&registry), before);
        assert_eq!(registry.bank_count(), 1);
    }

    #[test]
    fn test_double_load_and_unknown_unload() {
        let mut registry = EventRegistry::new();
        let b = bank("Once", &["X"]);
        registry.load_bank(Arc::clone(&b), false).unwrap();

        assert!(matches!(
            registry.load_bank(Arc::clone(&b), false),
            Err(PlaybackError::BankAlreadyLoaded(_))
        ));
        registry.unload_bank(b.id()).unwrap();
        assert!(matches!(
            registry.unload_bank(b.id()),
            Err(PlaybackError::BankNotLoaded(_))
        ));
    }

    #[test]
    fn test_cloned_bank_loads_separately() {
        let mut registry = EventRegistry::new();
        let original = bank("Main", &["Hit"]);
        let copy = Arc::new(Bank::clone(&original));
        registry.load_bank(Arc::clone(&original), false).unwrap();

        let report = registry.load_bank(Arc::clone(&copy), true).unwrap();
        assert_eq!(report.overwritten, vec!["Hit".to_string()]);
        assert_eq!(registry.bank_count(), 2);

        registry.unload_bank(original.id()).unwrap();
        assert_eq!(registry.bank_of("Hit"), Some(copy.id()));
        registry.unload_bank(copy.id()).unwrap();
        assert!(registry.lookup("Hit").is_none());
    }
}
