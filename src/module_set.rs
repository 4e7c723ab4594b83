//! The set of modules participating in one build
//!
//! A [`ModuleSet`] is immutable once built. Modules are unique by ID and,
//! when named, by full name. The dependency pins it reports are the
//! external ones only: pins naming a member module are internal edges.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use crate::digest::Digest;
use crate::error::{ModuleError, Result};
use crate::exec::Executor;
use crate::module::{Module, ModuleKey};
use crate::name::ModuleFullName;

/// Deduplicated collection of modules plus their external dependency pins
#[derive(Debug)]
pub struct ModuleSet {
    modules: Vec<Arc<Module>>,
    by_id: HashMap<String, usize>,
    by_full_name: HashMap<String, usize>,
    deps: Vec<ModuleKey>,
    per_module_deps: bool,
}

impl ModuleSet {
    pub fn builder() -> ModuleSetBuilder {
        ModuleSetBuilder::default()
    }

    /// All modules, in insertion order
    pub fn modules(&self) -> &[Arc<Module>] {
        &self.modules
    }

    /// Modules whose files are compiled by default
    pub fn target_modules(&self) -> impl Iterator<Item = &Arc<Module>> {
        self.modules.iter().filter(|m| m.is_target())
    }

    pub fn get_module(&self, id: &str) -> Option<&Arc<Module>> {
        self.by_id.get(id).map(|&i| &self.modules[i])
    }

    pub fn get_module_by_full_name(&self, full_name: &ModuleFullName) -> Option<&Arc<Module>> {
        self.by_full_name
            .get(&full_name.to_string())
            .map(|&i| &self.modules[i])
    }

    /// External dependency pins, sorted by full name
    pub fn deps(&self) -> &[ModuleKey] {
        &self.deps
    }

    /// Whether pins are tracked per module (legacy) or once for the set
    pub fn has_per_module_deps(&self) -> bool {
        self.per_module_deps
    }

    /// Pins that apply to `module`
    ///
    /// Under per-module tracking these are the module's own pins; otherwise
    /// every module shares the set-wide pins.
    pub fn deps_for(&self, module: &Module) -> Vec<ModuleKey> {
        if self.per_module_deps {
            module.deps().to_vec()
        } else {
            self.deps.clone()
        }
    }

    /// Digest every module, in parallel on `exec`
    ///
    /// Returns `(module ID, digest)` in module order.
    pub fn digests(&self, exec: &Executor) -> Result<Vec<(String, Digest)>> {
        let modules: Vec<Arc<Module>> = self.modules.clone();
        exec.map(modules, |module| {
            let digest = module.digest()?;
            debug!(module = %module.description(), digest = %digest, "Computed module digest");
            Ok((module.id().to_string(), digest))
        })
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Collects modules and validates them into a [`ModuleSet`]
#[derive(Default)]
pub struct ModuleSetBuilder {
    modules: Vec<Module>,
    global_deps: Option<Vec<ModuleKey>>,
}

impl ModuleSetBuilder {
    pub fn add_module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    /// Track pins once for the whole set (current schema)
    pub fn global_deps(mut self, deps: Vec<ModuleKey>) -> Self {
        self.global_deps = Some(deps);
        self
    }

    pub fn build(self) -> Result<ModuleSet> {
        let mut modules = Vec::with_capacity(self.modules.len());
        let mut by_id = HashMap::with_capacity(self.modules.len());
        let mut by_full_name = HashMap::new();

        for module in self.modules {
            let index = modules.len();
            if by_id.insert(module.id().to_string(), index).is_some() {
                return Err(ModuleError::DuplicateModuleId(module.id().to_string()));
            }
            if let Some(full_name) = module.full_name() {
                if by_full_name.insert(full_name.to_string(), index).is_some() {
                    return Err(ModuleError::DuplicateModule(full_name.to_string()));
                }
            }
            modules.push(Arc::new(module));
        }

        let per_module_deps = self.global_deps.is_none();
        let candidates = self
            .global_deps
            .unwrap_or_default()
            .into_iter()
            .chain(modules.iter().flat_map(|m| m.deps().iter().cloned()));
        let deps = union_external_deps(candidates, |name| by_full_name.contains_key(name))?;

        info!(
            modules = modules.len(),
            deps = deps.len(),
            per_module_deps,
            "Built module set"
        );

        Ok(ModuleSet {
            modules,
            by_id,
            by_full_name,
            deps,
            per_module_deps,
        })
    }
}

/// Union of pins by full name, skipping members, sorted by full name
///
/// A pin without a commit is superseded by one with a commit. Two different
/// non-empty commits for the same module conflict.
fn union_external_deps<I, F>(pins: I, is_member: F) -> Result<Vec<ModuleKey>>
where
    I: IntoIterator<Item = ModuleKey>,
    F: Fn(&str) -> bool,
{
    let mut union: BTreeMap<String, ModuleKey> = BTreeMap::new();
    for pin in pins {
        let name = pin.full_name().to_string();
        if is_member(&name) {
            continue;
        }
        match union.get(&name) {
            None => {
                union.insert(name, pin);
            }
            Some(existing) => {
                if existing.commit_id().is_empty() {
                    union.insert(name, pin);
                } else if !pin.commit_id().is_empty() && pin.commit_id() != existing.commit_id() {
                    return Err(ModuleError::DuplicateModule(name));
                }
            }
        }
    }
    Ok(union.into_values().collect())
}
