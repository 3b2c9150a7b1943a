//! Pattern registry: per-module event detection rules.
//!
//! Immutable once built. The engine starts from the builtin module
//! definitions and can merge extra `.toml` files over them; a module defined
//! in a file replaces the builtin module with the same id.

mod builtin;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::pattern::{DetectionRule, EventPattern};
use crate::model::template::TaskTemplate;

/// A change-feed collection owned by a module and the entity type it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionBinding {
    pub name: String,
    pub entity_type: String,
}

impl CollectionBinding {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// A business module: its collections and the patterns detected on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub id: String,
    #[serde(default)]
    pub subsidiary: Option<String>,
    #[serde(default)]
    pub collections: Vec<CollectionBinding>,
    #[serde(default)]
    pub patterns: Vec<EventPattern>,
}

impl ModuleDefinition {
    pub fn collection(&self, name: &str) -> Option<&CollectionBinding> {
        self.collections.iter().find(|c| c.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Config("module id must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for pattern in &self.patterns {
            if !seen.insert(pattern.event_type.as_str()) {
                return Err(Error::Config(format!(
                    "module {}: duplicate pattern for event type {}",
                    self.id, pattern.event_type
                )));
            }
            if let DetectionRule::FieldChanged { field_path } = &pattern.detection {
                if field_path.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "module {}: pattern {} has an empty field_path",
                        self.id, pattern.event_type
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Top-level TOML wrapper. One file may carry modules, templates, or both.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CatalogFile {
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
    #[serde(default)]
    pub templates: Vec<TaskTemplate>,
}

/// Parse every `.toml` file in a directory, in file-name order.
pub(crate) fn read_catalog_dir(dir: &Path) -> Result<Vec<(PathBuf, CatalogFile)>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Config(format!("cannot read catalog dir {}: {e}", dir.display())))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let content = std::fs::read_to_string(&path)?;
            let file: CatalogFile = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("bad catalog file {}: {e}", path.display())))?;
            Ok((path, file))
        })
        .collect()
}

/// Registry of module definitions, indexed by module id.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    modules: BTreeMap<String, ModuleDefinition>,
}

impl PatternRegistry {
    /// Create an empty registry with no modules.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The modules shipped with taskwire.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for module in builtin::modules() {
            registry.modules.insert(module.id.clone(), module);
        }
        registry
    }

    pub fn from_modules(modules: impl IntoIterator<Item = ModuleDefinition>) -> Result<Self> {
        let mut registry = Self::empty();
        for module in modules {
            registry.insert(module)?;
        }
        Ok(registry)
    }

    /// Builtin modules with every module from `dir` merged over them.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::builtin();
        for (_, file) in read_catalog_dir(dir)? {
            for module in file.modules {
                registry.insert(module)?;
            }
        }
        Ok(registry)
    }

    /// Add or replace a module definition.
    pub fn insert(&mut self, module: ModuleDefinition) -> Result<()> {
        module.validate()?;
        self.modules.insert(module.id.clone(), module);
        Ok(())
    }

    pub fn module(&self, module_id: &str) -> Option<&ModuleDefinition> {
        self.modules.get(module_id)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleDefinition> {
        self.modules.values()
    }

    /// Patterns for a module; empty for an unknown module.
    pub fn patterns_for_module(&self, module_id: &str) -> &[EventPattern] {
        self.modules
            .get(module_id)
            .map(|m| m.patterns.as_slice())
            .unwrap_or(&[])
    }

    pub fn pattern(&self, module_id: &str, event_type: &str) -> Option<&EventPattern> {
        self.patterns_for_module(module_id)
            .iter()
            .find(|p| p.event_type == event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::pattern::{EventCategory, Severity};

    #[test]
    fn builtin_covers_every_shipped_module() {
        let registry = PatternRegistry::builtin();
        for id in ["inventory", "engagements", "pipeline", "finance", "service_desk"] {
            let module = registry.module(id).expect(id);
            assert!(!module.collections.is_empty(), "{id} has no collections");
            assert!(!module.patterns.is_empty(), "{id} has no patterns");
        }
        assert!(registry.patterns_for_module("nope").is_empty());
    }

    #[test]
    fn duplicate_event_types_are_rejected() {
        let module = ModuleDefinition {
            id: "m".into(),
            subsidiary: None,
            collections: vec![],
            patterns: vec![
                EventPattern::created("x", EventCategory::Lifecycle),
                EventPattern::field_changed("x", EventCategory::StatusChange, "status"),
            ],
        };
        assert!(matches!(PatternRegistry::from_modules([module]), Err(Error::Config(_))));
    }

    #[test]
    fn directory_modules_replace_builtins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("inventory.toml"),
            r#"
            [[modules]]
            id = "inventory"
            subsidiary = "warehouse"

            [[modules.collections]]
            name = "bins"
            entity_type = "bin"

            [[modules.patterns]]
            event_type = "bin_full"
            category = "threshold"
            detection = { change = "field_changed", field_path = "fill" }

            [modules.patterns.severity]
            default = "low"
            rules = [{ when = { op = "current_at_least", value = 90.0 }, severity = "high" }]
            "#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = PatternRegistry::load_from_dir(dir.path()).unwrap();
        let patterns = registry.patterns_for_module("inventory");
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].event_type, "bin_full");
        assert_eq!(patterns[0].severity.default, Severity::Low);
        assert!(registry.module("engagements").is_some());
    }
}
