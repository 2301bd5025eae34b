//! Action dispatch as a pure state machine.
//!
//! A front end (TUI or CLI) feeds [`Event`]s into [`Dispatcher::handle`] and
//! carries out the returned [`Effect`]s: prompting, starting a run on a
//! background task, cancelling it, dropping cache keys. Completion comes back
//! in as another event. Transitions never perform I/O, so every path is
//! covered by plain unit tests.

use std::sync::Arc;

use crate::exec::{Args, ExecutionResult};
use crate::registry::{ActionDefinition, Registry};

pub type RunId = u64;

// ── State ───────────────────────────────────────────────────────────

/// Action picked but not yet started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    pub action: String,
    pub args: Args,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Waiting for the user to supply an argument.
    Selecting(Pending),
    /// Waiting for a yes/no on a dangerous action.
    ConfirmingDanger(Pending),
    /// `Start` issued, run not yet reported as spawned.
    Dispatching(RunId),
    /// Output of this run is being shown.
    Streaming(RunId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub run: RunId,
    pub action: String,
    pub label: String,
    pub dangerous: bool,
    pub serialized: bool,
    pub lock: Option<String>,
    pub follow: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchState {
    pub phase: Phase,
    pub in_flight: Vec<InFlight>,
    next_run: RunId,
}

impl Default for DispatchState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            in_flight: Vec::new(),
            next_run: 1,
        }
    }
}

impl DispatchState {
    fn with_phase(&self, phase: Phase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }

    pub fn is_running(&self) -> bool {
        !self.in_flight.is_empty()
    }
}

// ── Events & effects ────────────────────────────────────────────────

/// How a run ended, as far as the dispatcher cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed { message: String },
    TimedOut,
    Cancelled,
}

impl From<&ExecutionResult> for RunOutcome {
    fn from(r: &ExecutionResult) -> Self {
        if r.cancelled {
            RunOutcome::Cancelled
        } else if r.timed_out {
            RunOutcome::TimedOut
        } else if r.exit_code != 0 {
            RunOutcome::Failed {
                message: format!("exit code {}", r.exit_code),
            }
        } else {
            RunOutcome::Succeeded
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Select(String),
    ArgumentChosen { name: String, value: String },
    Confirmed(bool),
    /// The user backed out of a picker.
    Dismissed,
    Spawned(RunId),
    /// The run could not start (spawn failure, missing tool, ...).
    Failed { run: RunId, message: String },
    /// Cancel the foreground run, or the newest one in flight.
    Cancel,
    Finished { run: RunId, outcome: RunOutcome },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ShowError(String),
    PickArgument { action: String, name: String },
    Confirm { action: String, label: String },
    Start { run: RunId, action: String, args: Args },
    Cancel { run: RunId },
    Invalidate(Vec<String>),
    Notice(String),
}

// ── Dispatcher ──────────────────────────────────────────────────────

pub struct Dispatcher {
    registry: Arc<Registry>,
    machine: Option<String>,
    state: DispatchState,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, machine: Option<String>) -> Self {
        Self {
            registry,
            machine,
            state: DispatchState::default(),
        }
    }

    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    pub fn machine(&self) -> Option<&str> {
        self.machine.as_deref()
    }

    pub fn set_machine(&mut self, machine: Option<String>) {
        self.machine = machine;
    }

    /// Apply `event` and return the effects to carry out.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let (next, effects) = self.transition(&self.state, &event);
        if next.phase != self.state.phase {
            tracing::debug!(from = ?self.state.phase, to = ?next.phase, ?event, "dispatch transition");
        }
        self.state = next;
        effects
    }

    pub fn transition(&self, state: &DispatchState, event: &Event) -> (DispatchState, Vec<Effect>) {
        match (&state.phase, event) {
            // ── Selection ──
            (Phase::Idle | Phase::Streaming(_), Event::Select(id)) => self.select(state, id),

            (Phase::Selecting(pending), Event::ArgumentChosen { name, value }) => {
                let mut pending = pending.clone();
                pending.args.insert(name.clone(), value.clone());
                match self.registry.lookup(&pending.action) {
                    Ok(def) => self.advance(state, def, pending),
                    Err(e) => (state.with_phase(Phase::Idle), vec![Effect::ShowError(e.to_string())]),
                }
            }

            (Phase::Selecting(_) | Phase::ConfirmingDanger(_), Event::Dismissed) => {
                (state.with_phase(Phase::Idle), vec![])
            }

            // ── Confirmation ──
            (Phase::ConfirmingDanger(pending), Event::Confirmed(false)) => (
                state.with_phase(Phase::Idle),
                vec![Effect::Notice(format!("'{}' not started", pending.action))],
            ),
            (Phase::ConfirmingDanger(pending), Event::Confirmed(true)) => {
                match self.registry.lookup(&pending.action) {
                    Ok(def) => self.start(state, def, pending.clone()),
                    Err(e) => (state.with_phase(Phase::Idle), vec![Effect::ShowError(e.to_string())]),
                }
            }

            // ── Running ──
            (Phase::Dispatching(current), Event::Spawned(run)) if current == run => {
                (state.with_phase(Phase::Streaming(*run)), vec![])
            }

            (_, Event::Failed { run, message }) if is_in_flight(state, *run) => {
                let mut next = retire(state, *run);
                if matches!(state.phase, Phase::Dispatching(r) | Phase::Streaming(r) if r == *run) {
                    next.phase = Phase::Idle;
                }
                (next, vec![Effect::ShowError(message.clone())])
            }

            (_, Event::Cancel) => {
                let target = match state.phase {
                    Phase::Dispatching(run) | Phase::Streaming(run) => Some(run),
                    _ => state.in_flight.last().map(|f| f.run),
                };
                match target {
                    Some(run) => (state.clone(), vec![Effect::Cancel { run }]),
                    None => (state.clone(), vec![]),
                }
            }

            (_, Event::Finished { run, outcome }) if is_in_flight(state, *run) => {
                self.finish(state, *run, outcome)
            }

            // ── Anything else is ignored ──
            _ => (state.clone(), vec![]),
        }
    }

    fn select(&self, state: &DispatchState, id: &str) -> (DispatchState, Vec<Effect>) {
        let def = match self.registry.lookup(id) {
            Ok(def) => def,
            Err(e) => return (state.with_phase(Phase::Idle), vec![Effect::ShowError(e.to_string())]),
        };

        let mut args = Args::new();
        let wants_machine = def.requires_machine || def.placeholders().contains("machine");
        if wants_machine {
            match &self.machine {
                Some(machine) => {
                    args.insert("machine".into(), machine.clone());
                }
                None => {
                    return (
                        state.with_phase(Phase::Idle),
                        vec![Effect::ShowError(format!(
                            "'{}' needs a target machine; select one first",
                            def.label
                        ))],
                    );
                }
            }
        }

        self.advance(
            state,
            def,
            Pending {
                action: def.id.clone(),
                args,
            },
        )
    }

    /// Ask for the next missing argument, the danger confirmation, or start.
    fn advance(
        &self,
        state: &DispatchState,
        def: &ActionDefinition,
        pending: Pending,
    ) -> (DispatchState, Vec<Effect>) {
        if let Some(busy) = self.busy_error(state, def) {
            return (state.with_phase(Phase::Idle), vec![busy]);
        }

        if let Some(name) = def
            .extra_placeholders()
            .into_iter()
            .find(|p| !pending.args.contains_key(p))
        {
            let effect = Effect::PickArgument {
                action: def.id.clone(),
                name,
            };
            return (state.with_phase(Phase::Selecting(pending)), vec![effect]);
        }

        if def.dangerous {
            let effect = Effect::Confirm {
                action: def.id.clone(),
                label: def.label.clone(),
            };
            return (state.with_phase(Phase::ConfirmingDanger(pending)), vec![effect]);
        }

        self.start(state, def, pending)
    }

    fn start(
        &self,
        state: &DispatchState,
        def: &ActionDefinition,
        pending: Pending,
    ) -> (DispatchState, Vec<Effect>) {
        // Something may have started while the user was deciding.
        if let Some(busy) = self.busy_error(state, def) {
            return (state.with_phase(Phase::Idle), vec![busy]);
        }

        let run = state.next_run;
        let mut next = state.with_phase(Phase::Dispatching(run));
        next.next_run += 1;
        next.in_flight.push(InFlight {
            run,
            action: def.id.clone(),
            label: def.label.clone(),
            dangerous: def.dangerous,
            serialized: def.is_serialized(),
            lock: def.lock.clone(),
            follow: def.follow,
        });
        (
            next,
            vec![Effect::Start {
                run,
                action: pending.action,
                args: pending.args,
            }],
        )
    }

    fn finish(
        &self,
        state: &DispatchState,
        run: RunId,
        outcome: &RunOutcome,
    ) -> (DispatchState, Vec<Effect>) {
        let Some(flight) = state.in_flight.iter().find(|f| f.run == run) else {
            return (state.clone(), vec![]);
        };

        let mut next = retire(state, run);
        if matches!(state.phase, Phase::Dispatching(r) | Phase::Streaming(r) if r == run) {
            next.phase = Phase::Idle;
        }

        let mut message = match outcome {
            RunOutcome::Cancelled if flight.follow => format!("✓ stopped following {}", flight.label),
            RunOutcome::Succeeded => format!("✓ {} completed", flight.label),
            RunOutcome::Failed { message } => format!("✗ {} failed: {message}", flight.label),
            RunOutcome::TimedOut => format!("✗ {} timed out", flight.label),
            RunOutcome::Cancelled => format!("✗ {} cancelled", flight.label),
        };
        if flight.dangerous && *outcome != RunOutcome::Succeeded && !flight.follow {
            message.push_str(" (the change may have been partially applied)");
        }

        let invalidates = self
            .registry
            .lookup(&flight.action)
            .map(|d| d.invalidates.clone())
            .unwrap_or_default();

        (next, vec![Effect::Invalidate(invalidates), Effect::Notice(message)])
    }

    /// The first run `def` would conflict with: any run at all for a
    /// serialized action, otherwise another run of the same action or one
    /// holding the same lock.
    fn busy_error(&self, state: &DispatchState, def: &ActionDefinition) -> Option<Effect> {
        state
            .in_flight
            .iter()
            .find(|f| def.conflicts_with(&f.action, f.lock.as_deref(), f.serialized))
            .map(|running| {
                Effect::ShowError(
                    crate::error::ManageError::Busy {
                        running: running.action.clone(),
                        requested: def.id.clone(),
                    }
                    .to_string(),
                )
            })
    }
}

fn is_in_flight(state: &DispatchState, run: RunId) -> bool {
    state.in_flight.iter().any(|f| f.run == run)
}

fn retire(state: &DispatchState, run: RunId) -> DispatchState {
    let mut next = state.clone();
    next.in_flight.retain(|f| f.run != run);
    next
}
