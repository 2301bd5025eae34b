//! CLI front end: every subcommand goes through the same dispatcher as the
//! TUI, answering its prompts from flags or inquire.

use std::io::IsTerminal;
use std::time::Duration;

use facet::Facet;

use crate::cli::{Command, CreateVmArgs};
use crate::context::Context;
use crate::dispatch::{Dispatcher, Effect, Event, RunOutcome};
use crate::error::ManageError;
use crate::exec::{Args, ExecOptions, ExecutionResult, OutputLine, Target};
use crate::ops;
use crate::progress::{OutputMode, StepProgress};
use crate::registry::{ActionDefinition, Category};
use crate::vm::{self, VmRequest};

/// Flags shared by every subcommand.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target: Target,
    pub yes: bool,
    pub timeout: Option<Duration>,
    pub mode: OutputMode,
    pub json: bool,
}

// ── JSON output structs ─────────────────────────────────────────────

#[derive(Facet)]
struct ActionJson {
    id: String,
    label: String,
    category: String,
    description: String,
    dangerous: bool,
    requires_machine: bool,
    cached: bool,
}

#[derive(Facet)]
struct MachineJson {
    name: String,
    current: bool,
}

#[derive(Facet)]
struct ResultJson {
    action: String,
    command: String,
    exit_code: i32,
    timed_out: bool,
    cancelled: bool,
    duration_ms: u64,
    stdout: Vec<String>,
    stderr: Vec<String>,
}

#[derive(Facet)]
struct RebuildJson {
    built: Vec<String>,
    failed: Vec<String>,
}

fn print_json<'a, T: Facet<'a>>(value: &T) -> Result<(), ManageError> {
    let text = facet_json::to_string(value).map_err(|e| ManageError::Validation {
        message: format!("failed to encode JSON output: {e:?}"),
    })?;
    println!("{text}");
    Ok(())
}

// ── Entry point ─────────────────────────────────────────────────────

pub async fn run(ctx: &Context, opts: &RunOptions, command: Command) -> Result<(), ManageError> {
    match command {
        Command::Switch(m) => machine_action(ctx, opts, "switch", m.machine).await,
        Command::Build(m) => machine_action(ctx, opts, "build", m.machine).await,
        Command::DryRun(m) => machine_action(ctx, opts, "dry-run", m.machine).await,
        Command::Boot(m) => machine_action(ctx, opts, "boot", m.machine).await,
        Command::Test(m) => machine_action(ctx, opts, "test", m.machine).await,
        Command::Status(m) => machine_action(ctx, opts, "status", m.machine).await,
        Command::Update => dispatch(ctx, opts, "update", Args::new()).await,
        Command::UpdateNixpkgs => dispatch(ctx, opts, "update-nixpkgs", Args::new()).await,
        Command::Gc => dispatch(ctx, opts, "gc", Args::new()).await,
        Command::Health => dispatch(ctx, opts, "health", Args::new()).await,
        Command::RebuildAll => rebuild_all(ctx, opts).await,
        Command::ListMachines => list_machines(ctx, opts).await,
        Command::DevShells => dev_shells(ctx, opts).await,
        Command::CreateVm(args) => create_vm(ctx, opts, args).await,
        Command::Run { id, machine, args } => {
            let def = ctx.registry.lookup(&id)?;
            let mut args: Args = args.into_iter().collect();
            if wants_machine(def) && !args.contains_key("machine") {
                let machine = ops::resolve_machine(ctx, machine.as_deref()).await?;
                args.insert("machine".into(), machine);
            }
            dispatch(ctx, opts, &id, args).await
        }
        Command::Actions { category } => list_actions(ctx, opts, category.as_deref()),
        Command::Tui(m) => crate::tui::run(ctx.clone(), opts.target.clone(), m.machine).await,
    }
}

fn wants_machine(def: &ActionDefinition) -> bool {
    def.requires_machine || def.placeholders().contains("machine")
}

async fn machine_action(
    ctx: &Context,
    opts: &RunOptions,
    id: &str,
    machine: Option<String>,
) -> Result<(), ManageError> {
    let machine = ops::resolve_machine(ctx, machine.as_deref()).await?;
    let mut args = Args::new();
    args.insert("machine".into(), machine);
    dispatch(ctx, opts, id, args).await
}

// ── Dispatch ────────────────────────────────────────────────────────

/// Drive one action through the dispatcher to completion.
pub async fn dispatch(ctx: &Context, opts: &RunOptions, id: &str, args: Args) -> Result<(), ManageError> {
    let def = ctx.registry.lookup(id)?;
    let mut dispatcher = Dispatcher::new(ctx.registry.clone(), args.get("machine").cloned());
    let mut effects = dispatcher.handle(Event::Select(id.to_string()));

    loop {
        let mut next = None;
        for effect in effects {
            match effect {
                Effect::ShowError(message) => return Err(ManageError::Validation { message }),
                Effect::PickArgument { action, name } => match args.get(&name) {
                    Some(value) => {
                        next = Some(Event::ArgumentChosen {
                            name,
                            value: value.clone(),
                        })
                    }
                    None => return Err(ManageError::MissingArgument { action, name }),
                },
                Effect::Confirm { label, .. } => next = Some(Event::Confirmed(confirm(opts, &label)?)),
                Effect::Notice(message) => eprintln!("{message}"),
                Effect::Start { run, action, args } => {
                    dispatcher.handle(Event::Spawned(run));
                    let result = execute(ctx, opts, def, &action, &args).await;
                    let outcome = match &result {
                        Ok(r) => RunOutcome::from(r),
                        Err(ManageError::Cancelled { .. }) => RunOutcome::Cancelled,
                        Err(ManageError::Timeout { .. }) => RunOutcome::TimedOut,
                        Err(e) => RunOutcome::Failed {
                            message: e.to_string(),
                        },
                    };
                    for effect in dispatcher.handle(Event::Finished { run, outcome }) {
                        match effect {
                            Effect::Invalidate(keys) => {
                                for key in &keys {
                                    ctx.cache.invalidate_family(key);
                                }
                            }
                            Effect::Notice(message) if def.dangerous && !message.starts_with('✓') => {
                                eprintln!("{message}");
                            }
                            _ => {}
                        }
                    }
                    return finish(opts, def, &action, result?);
                }
                Effect::Cancel { .. } | Effect::Invalidate(_) => {}
            }
        }
        match next {
            Some(event) => effects = dispatcher.handle(event),
            // Declined, or nothing left to do.
            None => return Ok(()),
        }
    }
}

fn confirm(opts: &RunOptions, label: &str) -> Result<bool, ManageError> {
    if opts.yes {
        return Ok(true);
    }
    if opts.json || !std::io::stdin().is_terminal() {
        return Err(ManageError::Validation {
            message: format!("'{label}' is a dangerous action; pass --yes to run it non-interactively"),
        });
    }
    inquire::Confirm::new(&format!("'{label}' is a dangerous action. Run it?"))
        .with_default(false)
        .prompt()
        .map_err(vm::map_inquire_err)
}

/// Cancel the run on Ctrl-C. Abort the returned task once the run is over.
fn cancel_on_ctrl_c(options: &ExecOptions) -> tokio::task::JoinHandle<()> {
    let token = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    })
}

async fn execute(
    ctx: &Context,
    opts: &RunOptions,
    def: &ActionDefinition,
    action: &str,
    args: &Args,
) -> Result<ExecutionResult, ManageError> {
    let options = ExecOptions::with_timeout(opts.timeout);
    let watcher = cancel_on_ctrl_c(&options);

    let result = if opts.json {
        ops::run_action(ctx, action, args, &opts.target, &mut |_: OutputLine| {}, &options).await
    } else {
        // Failures surface as errors so the step gets its cross mark.
        let mut progress = StepProgress::new(1, opts.mode);
        progress
            .run(&def.label, |step| async move {
                let result = ops::run_action(
                    ctx,
                    action,
                    args,
                    &opts.target,
                    &mut |line: OutputLine| step.log(&line.text),
                    &options,
                )
                .await?;
                settle(def, result)
            })
            .await
    };

    watcher.abort();
    result
}

/// A stopped follow is a normal end; anything else must have succeeded.
fn settle(def: &ActionDefinition, result: ExecutionResult) -> Result<ExecutionResult, ManageError> {
    if def.follow && result.cancelled {
        Ok(result)
    } else {
        result.into_outcome()
    }
}

fn finish(opts: &RunOptions, def: &ActionDefinition, action: &str, result: ExecutionResult) -> Result<(), ManageError> {
    if opts.json {
        print_json(&ResultJson {
            action: action.to_string(),
            command: result.command.clone(),
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            cancelled: result.cancelled,
            duration_ms: result.duration_ms,
            stdout: result.stdout_tail.clone(),
            stderr: result.stderr_tail.clone(),
        })?;
    }
    settle(def, result).map(|_| ())
}

// ── Operations with their own presentation ──────────────────────────

/// `--timeout` bounds the whole run, like the action's own timeout.
async fn rebuild_all(ctx: &Context, opts: &RunOptions) -> Result<(), ManageError> {
    let limit = opts.timeout.unwrap_or(ctx.registry.lookup("rebuild-all")?.timeout);
    let machines = ops::known_machines(ctx).await?;
    let options = ExecOptions::default();
    let watcher = cancel_on_ctrl_c(&options);

    let mut report = ops::RebuildReport::default();
    let mut progress = StepProgress::new(machines.len(), if opts.json { OutputMode::Quiet } else { opts.mode });
    let builds = async {
        for machine in &machines {
            if options.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let outcome = progress
                .run(&format!("Building {machine}"), |step| {
                    let options = &options;
                    async move {
                        let result = ops::build_machine(
                            ctx,
                            machine,
                            &opts.target,
                            &mut |line: OutputLine| step.log(&line.text),
                            options,
                        )
                        .await?;
                        step.set_done_label(format!("{machine} ({}s)", result.duration_ms / 1000));
                        result.into_outcome()
                    }
                })
                .await;
            if let Err(ManageError::Cancelled { .. }) = outcome {
                report.cancelled = true;
                break;
            }
            report.record(machine, outcome.is_ok());
        }
    };
    let ((), expired) = ops::with_deadline(limit, &options.cancel, builds).await;
    watcher.abort();

    if opts.json {
        print_json(&RebuildJson {
            built: report.built.clone(),
            failed: report.failed.clone(),
        })?;
    } else if report.failed.is_empty() && !report.cancelled {
        progress.println(&format!("All {} machine(s) built", report.built.len()));
    }
    if expired {
        tracing::warn!(seconds = limit.as_secs(), "rebuild-all timed out");
        return Err(ManageError::Timeout {
            command: "rebuild-all".into(),
            seconds: limit.as_secs(),
        });
    }
    report.into_result()
}

async fn list_machines(ctx: &Context, opts: &RunOptions) -> Result<(), ManageError> {
    let known = ops::known_machines(ctx).await?;
    let current = ops::local_hostname().await.ok();
    if opts.json {
        let machines: Vec<MachineJson> = known
            .iter()
            .map(|m| MachineJson {
                name: m.clone(),
                current: current.as_ref() == Some(m),
            })
            .collect();
        return print_json(&machines);
    }
    for line in ops::list_machines(ctx, current.as_deref()).await? {
        println!("{line}");
    }
    Ok(())
}

async fn dev_shells(ctx: &Context, opts: &RunOptions) -> Result<(), ManageError> {
    let shells = ops::dev_shells(ctx).await?;
    if opts.json {
        return print_json(&shells);
    }
    for shell in shells {
        println!("{shell}");
    }
    Ok(())
}

fn list_actions(ctx: &Context, opts: &RunOptions, category: Option<&str>) -> Result<(), ManageError> {
    let category = match category {
        Some(c) => Some(Category::parse(c).ok_or_else(|| ManageError::Validation {
            message: format!(
                "unknown category '{c}' (known: {})",
                Category::ALL.map(|c| c.as_str()).join(", ")
            ),
        })?),
        None => None,
    };
    let actions = ctx.registry.list(category);

    if opts.json {
        let actions: Vec<ActionJson> = actions
            .iter()
            .map(|d| ActionJson {
                id: d.id.clone(),
                label: d.label.clone(),
                category: d.category.as_str().to_string(),
                description: d.description.clone(),
                dangerous: d.dangerous,
                requires_machine: d.requires_machine,
                cached: d.cache.is_some(),
            })
            .collect();
        return print_json(&actions);
    }

    let width = actions.iter().map(|d| d.id.len()).max().unwrap_or(0);
    let mut last = None;
    for def in actions {
        if last != Some(def.category) {
            println!("{}", console::style(def.category.title()).bold());
            last = Some(def.category);
        }
        let mut flags = String::new();
        if def.dangerous {
            flags.push_str(&format!(" {}", console::style("[dangerous]").red()));
        }
        if def.requires_machine {
            flags.push_str(" [machine]");
        }
        println!("  {:<width$}  {}{flags}", def.id, def.label);
    }
    Ok(())
}

async fn create_vm(ctx: &Context, opts: &RunOptions, args: CreateVmArgs) -> Result<(), ManageError> {
    let request = match args.name {
        Some(name) => VmRequest {
            name,
            os: args.os,
            memory: args.memory,
            cpus: args.cpus,
            disk: args.disk,
            network: args.network,
            iso: args.iso,
        },
        None if std::io::stdin().is_terminal() && !opts.json => {
            let existing = ops::vm_list(ctx).await.unwrap_or_default();
            vm::wizard(&ctx.settings.config.vm, &existing)?
        }
        None => {
            return Err(ManageError::Validation {
                message: "--name is required when not running interactively".into(),
            });
        }
    };

    // Validate before dispatching so bad input never reaches the executor.
    request.validate(&ctx.settings.config.vm)?;
    dispatch(ctx, opts, "create-vm", request.to_args()).await
}
