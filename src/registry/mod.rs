//! Command registry: action id → definition.
//!
//! The registry is filled once at startup from the built-in table and the
//! `[actions.<id>]` overrides in the config, then shared read-only.

pub mod builtin;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use crate::config::ActionOverride;
use crate::error::ManageError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Timeout for follow-mode actions, which normally end by cancellation.
pub const FOLLOW_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Shared resources an action holds while it runs. Two actions holding the
/// same lock never overlap.
pub mod locks {
    /// The system profile and the Nix store (`nixos-rebuild`, `nix build`, gc).
    pub const SYSTEM_PROFILE: &str = "system-profile";
    /// The flake checkout and its `flake.lock`.
    pub const FLAKE: &str = "flake";
    /// The Docker daemon's containers and images.
    pub const DOCKER: &str = "docker";
}

// ── Categories ───────────────────────────────────────────

/// Menu tab an action is listed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Nixos,
    Docker,
    System,
    Git,
    Network,
    Services,
    Storage,
    Vm,
    Dev,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Nixos,
        Category::Docker,
        Category::System,
        Category::Git,
        Category::Network,
        Category::Services,
        Category::Storage,
        Category::Vm,
        Category::Dev,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Nixos => "nixos",
            Category::Docker => "docker",
            Category::System => "system",
            Category::Git => "git",
            Category::Network => "network",
            Category::Services => "services",
            Category::Storage => "storage",
            Category::Vm => "vm",
            Category::Dev => "dev",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Category::Nixos => "NixOS",
            Category::Docker => "Docker",
            Category::System => "System",
            Category::Git => "Git",
            Category::Network => "Network",
            Category::Services => "Services",
            Category::Storage => "Storage",
            Category::Vm => "Virtual Machines",
            Category::Dev => "Dev Shells",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Command templates ────────────────────────────────────

/// One step of an action's command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStep {
    /// Argument vector; any argument may contain `{name}` placeholders.
    Argv(Vec<String>),
    /// Pipeline run through `sh -c`. Built from trusted text only and never
    /// contains placeholders (enforced by `Registry::register`).
    TrustedShell(String),
}

impl CommandStep {
    pub fn argv<S: AsRef<str>>(args: &[S]) -> Self {
        CommandStep::Argv(args.iter().map(|a| a.as_ref().to_string()).collect())
    }

    pub fn shell(pipeline: &str) -> Self {
        CommandStep::TrustedShell(pipeline.to_string())
    }

    /// Placeholder names referenced by this step, in order of appearance.
    pub fn placeholders(&self) -> Vec<String> {
        match self {
            CommandStep::Argv(args) => args.iter().flat_map(|a| placeholders_in(a)).collect(),
            CommandStep::TrustedShell(s) => placeholders_in(s),
        }
    }
}

/// What running an action means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Spawn the steps through the executor, one after another.
    Command(Vec<CommandStep>),
    /// Composite operation implemented in `ops`.
    Operation(Operation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Build every known machine, continuing past failures.
    RebuildAll,
    /// Show known machines, marking the active one.
    ListMachines,
    /// Enumerate the flake's dev shells.
    ListDevShells,
    /// Define a new libvirt VM (interactive in the TUI).
    CreateVm,
    /// Reachability and NixOS version of every known machine.
    MachineStatus,
}

/// Read-only actions whose stdout is memoized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
}

// ── ActionDefinition ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDefinition {
    pub id: String,
    pub label: String,
    pub description: String,
    pub category: Category,
    pub kind: ActionKind,
    pub dangerous: bool,
    pub requires_machine: bool,
    pub timeout: Duration,
    pub cache: Option<CachePolicy>,
    /// Cache key families dropped when this action completes.
    pub invalidates: Vec<String>,
    /// Lets the action overlap with other runs, itself included.
    pub parallel_safe: bool,
    /// Resource held for the duration of the run; see [`locks`].
    pub lock: Option<String>,
    /// Streams until cancelled; cancellation is the normal way it ends.
    pub follow: bool,
}

impl ActionDefinition {
    pub fn command(id: &str, label: &str, category: Category, steps: Vec<CommandStep>) -> Self {
        Self::new(id, label, category, ActionKind::Command(steps))
    }

    pub fn operation(id: &str, label: &str, category: Category, op: Operation) -> Self {
        Self::new(id, label, category, ActionKind::Operation(op))
    }

    fn new(id: &str, label: &str, category: Category, kind: ActionKind) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            description: String::new(),
            category,
            kind,
            dangerous: false,
            requires_machine: false,
            timeout: DEFAULT_TIMEOUT,
            cache: None,
            invalidates: Vec::new(),
            parallel_safe: false,
            lock: None,
            follow: false,
        }
    }

    pub fn steps(&self) -> &[CommandStep] {
        match &self.kind {
            ActionKind::Command(steps) => steps,
            ActionKind::Operation(_) => &[],
        }
    }

    /// Distinct placeholder names across all steps.
    pub fn placeholders(&self) -> BTreeSet<String> {
        self.steps().iter().flat_map(|s| s.placeholders()).collect()
    }

    /// Placeholders the user has to supply beyond the active machine.
    pub fn extra_placeholders(&self) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|p| p != "machine")
            .collect()
    }

    /// Dangerous actions that must not overlap with any other run.
    pub fn is_serialized(&self) -> bool {
        self.dangerous && !self.parallel_safe
    }

    /// Whether this action has to wait for a run of `other_id`.
    pub fn conflicts_with(&self, other_id: &str, other_lock: Option<&str>, other_serialized: bool) -> bool {
        if self.is_serialized() || other_serialized {
            return true;
        }
        if self.parallel_safe {
            return false;
        }
        other_id == self.id || (self.lock.is_some() && self.lock.as_deref() == other_lock)
    }

    fn apply_override(&mut self, o: &ActionOverride) {
        if let Some(dangerous) = o.dangerous {
            self.dangerous = dangerous;
        }
        if let Some(timeout) = o.timeout_s {
            self.timeout = Duration::from_secs(timeout);
        }
        if let Some(ttl) = o.ttl_s {
            self.cache = (ttl > 0).then(|| CachePolicy {
                ttl: Duration::from_secs(ttl),
            });
        }
        if let Some(parallel_safe) = o.parallel_safe {
            self.parallel_safe = parallel_safe;
        }
        if let Some(lock) = &o.lock {
            self.lock = (!lock.is_empty()).then(|| lock.clone());
        }
    }
}

/// Extract `{name}` placeholders from a string. Names are `[a-z_]+`;
/// anything else between braces is left alone.
fn placeholders_in(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if !name.is_empty() && name.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
                    out.push(name.to_string());
                }
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    out
}

// ── Registry ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Registry {
    actions: Vec<ActionDefinition>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in table with config overrides applied.
    pub fn with_builtins(
        overrides: &BTreeMap<String, ActionOverride>,
    ) -> Result<Self, ManageError> {
        let mut registry = Self::new();
        for def in builtin::definitions() {
            registry.register(def)?;
        }
        for (id, o) in overrides {
            let idx = *registry
                .index
                .get(id)
                .ok_or_else(|| ManageError::UnknownAction { id: id.clone() })?;
            registry.actions[idx].apply_override(o);
            tracing::debug!(id, "applied action override");
        }
        Ok(registry)
    }

    pub fn register(&mut self, def: ActionDefinition) -> Result<(), ManageError> {
        if self.index.contains_key(&def.id) {
            return Err(ManageError::DuplicateActionId { id: def.id });
        }
        for step in def.steps() {
            if let CommandStep::TrustedShell(pipeline) = step
                && !step.placeholders().is_empty()
            {
                return Err(ManageError::Validation {
                    message: format!(
                        "action '{}': shell pipeline must not contain placeholders: {pipeline}",
                        def.id
                    ),
                });
            }
        }
        self.index.insert(def.id.clone(), self.actions.len());
        self.actions.push(def);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Result<&ActionDefinition, ManageError> {
        self.index
            .get(id)
            .map(|&i| &self.actions[i])
            .ok_or_else(|| ManageError::UnknownAction { id: id.to_string() })
    }

    /// Definitions in registration order, optionally restricted to a category.
    pub fn list(&self, category: Option<Category>) -> Vec<&ActionDefinition> {
        self.actions
            .iter()
            .filter(|d| category.is_none_or(|c| d.category == c))
            .collect()
    }

    /// Categories that have at least one action, in menu order.
    pub fn categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.actions.iter().any(|d| d.category == *c))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
