//! Hook registry.
//!
//! Maps lifecycle event names to ordered module bindings. The registry is
//! purely declarative: it knows which modules react to which events and where
//! their code lives, never what that code does.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use log::{debug, info};

/// One module bound to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookBinding {
    pub event: String,
    pub module_id: String,
    pub priority: i64,
    pub enabled: bool,
    /// Declaration order; assigned by [`HookRegistry::register`].
    pub sequence: u64,
}

impl HookBinding {
    pub fn new(event: impl Into<String>, module_id: impl Into<String>, priority: i64) -> Self {
        Self {
            event: event.into(),
            module_id: module_id.into(),
            priority,
            enabled: true,
            sequence: 0,
        }
    }
}

/// Where a module's code lives and how long it may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub id: String,
    pub source: PathBuf,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    bindings: Vec<HookBinding>,
    modules: BTreeMap<String, ModuleSpec>,
    disabled: BTreeSet<String>,
    next_sequence: u64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding; its sequence number records declaration order.
    pub fn register(&mut self, mut binding: HookBinding) {
        binding.sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!(
            "bound '{}' to {} (priority {}, seq {})",
            binding.module_id, binding.event, binding.priority, binding.sequence
        );
        self.bindings.push(binding);
    }

    pub fn add_module(&mut self, spec: ModuleSpec) {
        self.modules.insert(spec.id.clone(), spec);
    }

    /// Active bindings for `event`, highest priority first; ties keep declaration order.
    pub fn bindings_for(&self, event: &str) -> Vec<HookBinding> {
        let mut found: Vec<HookBinding> = self
            .bindings
            .iter()
            .filter(|b| b.event == event && b.enabled && !self.disabled.contains(&b.module_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
        found
    }

    /// Stop a module from running on any event. Returns `false` if it was already disabled.
    pub fn disable(&mut self, module_id: &str) -> bool {
        let changed = self.disabled.insert(module_id.to_string());
        if changed {
            info!("script module '{module_id}' disabled");
        }
        changed
    }

    /// Undo [`HookRegistry::disable`]. Returns `false` if it was not disabled.
    pub fn enable(&mut self, module_id: &str) -> bool {
        let changed = self.disabled.remove(module_id);
        if changed {
            info!("script module '{module_id}' enabled");
        }
        changed
    }

    pub fn is_disabled(&self, module_id: &str) -> bool {
        self.disabled.contains(module_id)
    }

    pub fn module(&self, id: &str) -> Option<&ModuleSpec> {
        self.modules.get(id)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleSpec> {
        self.modules.values()
    }

    /// Every event with at least one binding, enabled or not.
    pub fn events(&self) -> BTreeSet<&str> {
        self.bindings.iter().map(|b| b.event.as_str()).collect()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(bindings: &[HookBinding]) -> Vec<&str> {
        bindings.iter().map(|b| b.module_id.as_str()).collect()
    }

    #[test]
    fn priority_desc_then_declaration_order() {
        let mut reg = HookRegistry::new();
        reg.register(HookBinding::new("on_battle_end", "m1", 10));
        reg.register(HookBinding::new("on_battle_end", "m2", 5));
        reg.register(HookBinding::new("on_battle_end", "m3", 10));
        assert_eq!(ids(&reg.bindings_for("on_battle_end")), vec!["m1", "m3", "m2"]);
    }

    #[test]
    fn other_events_are_not_returned() {
        let mut reg = HookRegistry::new();
        reg.register(HookBinding::new("on_battle_end", "m1", 0));
        reg.register(HookBinding::new("on_item_acquired", "m2", 0));
        assert_eq!(ids(&reg.bindings_for("on_item_acquired")), vec!["m2"]);
        assert!(reg.bindings_for("on_area_entered").is_empty());
        assert_eq!(
            reg.events().into_iter().collect::<Vec<_>>(),
            vec!["on_battle_end", "on_item_acquired"]
        );
    }

    #[test]
    fn disable_removes_module_everywhere_until_enabled() {
        let mut reg = HookRegistry::new();
        reg.register(HookBinding::new("on_battle_end", "noisy", 1));
        reg.register(HookBinding::new("on_player_levelup", "noisy", 1));
        reg.register(HookBinding::new("on_player_levelup", "quiet", 0));
        assert!(reg.disable("noisy"));
        assert!(!reg.disable("noisy"));
        assert!(reg.bindings_for("on_battle_end").is_empty());
        assert_eq!(ids(&reg.bindings_for("on_player_levelup")), vec!["quiet"]);
        assert!(reg.enable("noisy"));
        assert_eq!(ids(&reg.bindings_for("on_player_levelup")), vec!["noisy", "quiet"]);
    }

    #[test]
    fn disabled_bindings_are_never_yielded() {
        let mut reg = HookRegistry::new();
        let mut off = HookBinding::new("on_battle_start", "off", 99);
        off.enabled = false;
        reg.register(off);
        assert!(reg.bindings_for("on_battle_start").is_empty());
        assert_eq!(reg.binding_count(), 1);
    }
}
