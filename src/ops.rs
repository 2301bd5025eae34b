//! Operations shared by the CLI and the TUI: running an action by id (with
//! its cache policy), machine resolution, the cached queries and the
//! composite operations.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::cache::keys;
use crate::context::Context;
use crate::error::ManageError;
use crate::exec::{Args, EXIT_TIMED_OUT, ExecOptions, ExecutionResult, OutputLine, Stream, Target};
use crate::registry::{ActionDefinition, ActionKind, Category, CommandStep, Operation};
use crate::vm::{self, VmRequest};

const QUERY_TIMEOUT: Duration = Duration::from_secs(120);
const NIX_FEATURES: &str = "nix-command flakes";
const MACHINE_INFO_TIMEOUT: Duration = Duration::from_secs(30);

const MACHINE_INFO: &str = r#"printf 'NixOS:       %s\n' "$(nixos-version 2>/dev/null || echo unknown)"
printf 'Kernel:      %s\n' "$(uname -r)"
printf 'Generation:  %s\n' "$(readlink /nix/var/nix/profiles/system 2>/dev/null | grep -oE '[0-9]+' | tail -1)"
printf 'Last Switch: %s\n' "$(stat -c %y /run/current-system 2>/dev/null | cut -d. -f1)"
printf 'Uptime:      %s\n' "$(uptime -p 2>/dev/null || echo unknown)""#;

/// Output sink for a running action.
pub type LineSink<'a> = &'a mut (dyn FnMut(OutputLine) + Send);

fn emit(on_line: &mut (dyn FnMut(OutputLine) + Send), stream: Stream, text: impl Into<String>) {
    on_line(OutputLine {
        stream,
        text: text.into(),
    });
}

/// Result for work that did not map onto a single process.
fn synthetic(command: &str, exit_code: i32, stdout: Vec<String>, stderr: Vec<String>, started: Instant) -> ExecutionResult {
    ExecutionResult {
        exit_code,
        stdout_tail: stdout,
        stderr_tail: stderr,
        timed_out: false,
        cancelled: false,
        duration_ms: started.elapsed().as_millis() as u64,
        command: command.to_string(),
        timeout: Duration::ZERO,
    }
}

// ── Running actions ──────────────────────────────────────

/// Cache key for a cached action: `id`, or `id:k=v,...` with the remote
/// name first when not local. Family invalidation of `id` covers all forms.
pub fn cache_key(def: &ActionDefinition, args: &Args, target: &Target) -> String {
    let mut parts = Vec::new();
    if let Target::Remote(m) = target {
        parts.push(format!("remote={}", m.name));
    }
    parts.extend(args.iter().map(|(k, v)| format!("{k}={v}")));
    if parts.is_empty() {
        def.id.clone()
    } else {
        format!("{}:{}", def.id, parts.join(","))
    }
}

/// Run `work` for at most `limit`. On expiry `cancel` fires and `work` is
/// still awaited so it can stop its children; the flag is set when that
/// happened.
pub async fn with_deadline<F: Future>(limit: Duration, cancel: &CancellationToken, work: F) -> (F::Output, bool) {
    tokio::pin!(work);
    tokio::select! {
        output = &mut work => (output, false),
        _ = tokio::time::sleep(limit) => {
            cancel.cancel();
            (work.await, true)
        }
    }
}

/// Run the action `id`: memoized commands are served from the cache, other
/// commands go through the executor, composite operations run here under
/// the action's timeout.
pub async fn run_action(
    ctx: &Context,
    id: &str,
    args: &Args,
    target: &Target,
    on_line: LineSink<'_>,
    options: &ExecOptions,
) -> Result<ExecutionResult, ManageError> {
    let def = ctx.registry.lookup(id)?;
    match &def.kind {
        ActionKind::Command(_) => run_command(ctx, def, args, target, on_line, options).await,
        ActionKind::Operation(op) => {
            let limit = options.timeout.unwrap_or(def.timeout);
            let inner = ExecOptions {
                timeout: None,
                cancel: options.cancel.child_token(),
            };
            let started = Instant::now();
            let work = run_operation(ctx, def, *op, args, target, &mut *on_line, &inner);
            let (result, expired) = with_deadline(limit, &inner.cancel, work).await;
            if !expired {
                return result;
            }
            tracing::warn!(action = %def.id, seconds = limit.as_secs(), "operation timed out");
            let message = format!("✗ {} timed out after {}s", def.label, limit.as_secs());
            emit(on_line, Stream::Stderr, message.clone());
            Ok(ExecutionResult {
                timed_out: true,
                timeout: limit,
                ..synthetic(&def.id, EXIT_TIMED_OUT, Vec::new(), vec![message], started)
            })
        }
    }
}

async fn run_operation(
    ctx: &Context,
    def: &ActionDefinition,
    op: Operation,
    args: &Args,
    target: &Target,
    on_line: LineSink<'_>,
    options: &ExecOptions,
) -> Result<ExecutionResult, ManageError> {
    let id = def.id.as_str();
    match op {
        Operation::RebuildAll => {
            Ok(rebuild_all(ctx, target, on_line, options).await?.into_execution_result())
        }
        Operation::ListMachines => {
            let started = Instant::now();
            let lines = list_machines(ctx, args.get("machine").map(String::as_str)).await?;
            for line in &lines {
                emit(on_line, Stream::Stdout, line.clone());
            }
            Ok(synthetic(id, 0, lines, Vec::new(), started))
        }
        Operation::ListDevShells => {
            let started = Instant::now();
            let shells = dev_shells(ctx).await?;
            for shell in &shells {
                emit(on_line, Stream::Stdout, shell.clone());
            }
            Ok(synthetic(id, 0, shells, Vec::new(), started))
        }
        Operation::CreateVm => {
            let spec = VmRequest::from_args(args)?.validate(&ctx.settings.config.vm)?;
            vm::create_vm(ctx, &spec, on_line, options).await
        }
        Operation::MachineStatus => {
            let local = local_hostname().await.ok();
            machine_status(ctx, local.as_deref(), on_line, options).await
        }
    }
}

async fn run_command(
    ctx: &Context,
    def: &ActionDefinition,
    args: &Args,
    target: &Target,
    on_line: LineSink<'_>,
    options: &ExecOptions,
) -> Result<ExecutionResult, ManageError> {
    let policy = def.cache.map(|p| (cache_key(def, args, target), p.ttl));

    if let Some((key, _)) = &policy
        && let Some(lines) = ctx.cache.get(key)
    {
        tracing::info!(action = %def.id, %key, "serving cached output");
        for line in &lines {
            emit(on_line, Stream::Stdout, line.clone());
        }
        return Ok(ExecutionResult {
            command: format!("(cached) {}", def.id),
            ..synthetic(&def.id, 0, lines, Vec::new(), Instant::now())
        });
    }

    let caching = policy.is_some();
    let mut stdout = Vec::new();
    let result = ctx
        .executor
        .execute(
            def,
            args,
            target,
            &mut |line: OutputLine| {
                if caching && line.stream == Stream::Stdout {
                    stdout.push(line.text.clone());
                }
                on_line(line);
            },
            options,
        )
        .await?;

    if let Some((key, ttl)) = policy
        && result.success()
    {
        ctx.cache.set(&key, stdout, ttl);
    }
    Ok(result)
}

// ── Machines ─────────────────────────────────────────────

fn query(id: &str, argv: &[&str]) -> ActionDefinition {
    let mut def = ActionDefinition::command(id, id, Category::Nixos, vec![CommandStep::argv(argv)]);
    def.timeout = QUERY_TIMEOUT;
    def
}

/// Run a query through the executor, memoized under `key`.
async fn cached_query<F>(
    ctx: &Context,
    key: &str,
    ttl: Duration,
    def: ActionDefinition,
    args: Args,
    parse: F,
) -> Result<Vec<String>, ManageError>
where
    F: FnOnce(&[String]) -> Result<Vec<String>, String>,
{
    if let Some(value) = ctx.cache.get(key) {
        return Ok(value);
    }
    let (result, lines) = ctx
        .executor
        .capture(&def, &args, &Target::Local, &ExecOptions::default())
        .await?;
    let result = result.into_outcome()?;
    let value = parse(&lines).map_err(|message| ManageError::Validation {
        message: format!("unexpected output from `{}`: {message}", result.command),
    })?;
    ctx.cache.set(key, value.clone(), ttl);
    Ok(value)
}

fn parse_json_names(lines: &[String]) -> Result<Vec<String>, String> {
    let mut names: Vec<String> = facet_json::from_str(&lines.join("\n")).map_err(|e| e.to_string())?;
    names.sort();
    Ok(names)
}

/// Machines declared in the config, or the flake's `nixosConfigurations`.
pub async fn known_machines(ctx: &Context) -> Result<Vec<String>, ManageError> {
    let configured = &ctx.settings.config.machines;
    if !configured.is_empty() {
        return Ok(configured.clone());
    }
    cached_query(
        ctx,
        keys::MACHINE_LIST,
        Duration::from_secs(ctx.settings.config.cache.machine_list_ttl_s),
        query(
            keys::MACHINE_LIST,
            &[
                "nix", "eval", ".#nixosConfigurations", "--apply", "builtins.attrNames", "--json",
                "--extra-experimental-features", NIX_FEATURES,
            ],
        ),
        Args::new(),
        parse_json_names,
    )
    .await
}

/// `/etc/hostname`, falling back to the `hostname` command.
pub async fn local_hostname() -> Result<String, ManageError> {
    if let Ok(contents) = tokio::fs::read_to_string("/etc/hostname").await {
        let name = contents.trim();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
    }

    let output = tokio::process::Command::new("hostname")
        .output()
        .await
        .map_err(|source| ManageError::SpawnFailure {
            command: "hostname".into(),
            source,
        })?;
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || name.is_empty() {
        return Err(ManageError::Validation {
            message: "could not determine the local hostname".into(),
        });
    }
    Ok(name)
}

/// The explicit machine, or the local hostname; must be a known machine.
pub async fn resolve_machine(ctx: &Context, explicit: Option<&str>) -> Result<String, ManageError> {
    let name = match explicit {
        Some(name) => name.to_string(),
        None => local_hostname().await?,
    };
    let known = known_machines(ctx).await?;
    check_known(&name, &known)?;
    Ok(name)
}

fn check_known(name: &str, known: &[String]) -> Result<(), ManageError> {
    if known.iter().any(|m| m == name) {
        Ok(())
    } else {
        Err(ManageError::UnknownMachine {
            name: name.to_string(),
            known: if known.is_empty() {
                "none".into()
            } else {
                known.join(", ")
            },
        })
    }
}

/// One line per known machine, marking `current` (or the local host).
pub async fn list_machines(ctx: &Context, current: Option<&str>) -> Result<Vec<String>, ManageError> {
    let known = known_machines(ctx).await?;
    let current = match current {
        Some(c) => Some(c.to_string()),
        None => local_hostname().await.ok(),
    };
    Ok(known
        .iter()
        .map(|m| {
            if Some(m) == current.as_ref() {
                format!("{m} (current)")
            } else {
                m.clone()
            }
        })
        .collect())
}

// ── Other queries ────────────────────────────────────────

pub async fn dev_shells(ctx: &Context) -> Result<Vec<String>, ManageError> {
    let mut args = Args::new();
    args.insert("system".into(), ctx.settings.config.system.clone());
    cached_query(
        ctx,
        keys::DEV_SHELLS,
        Duration::from_secs(ctx.settings.config.cache.dev_shell_ttl_s),
        query(
            keys::DEV_SHELLS,
            &[
                "nix", "eval", ".#devShells.{system}", "--apply", "builtins.attrNames", "--json",
                "--extra-experimental-features", NIX_FEATURES,
            ],
        ),
        args,
        parse_json_names,
    )
    .await
}

/// Names of all libvirt domains, running or not.
pub async fn vm_list(ctx: &Context) -> Result<Vec<String>, ManageError> {
    let mut args = Args::new();
    args.insert("virsh".into(), ctx.settings.config.vm.virsh.clone());
    args.insert("uri".into(), ctx.settings.config.vm.libvirt_uri.clone());
    cached_query(
        ctx,
        keys::VM_LIST,
        Duration::from_secs(ctx.settings.config.cache.vm_list_ttl_s),
        query(keys::VM_LIST, &["{virsh}", "-c", "{uri}", "list", "--all", "--name"]),
        args,
        |lines| {
            Ok(lines
                .iter()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect())
        },
    )
    .await
}

/// Names of all docker containers, running or not.
pub async fn containers(ctx: &Context) -> Result<Vec<String>, ManageError> {
    let mut def = query(keys::CONTAINERS, &["docker", "ps", "-a", "--format", "{{.Names}}"]);
    def.category = Category::Docker;
    cached_query(
        ctx,
        keys::CONTAINERS,
        Duration::from_secs(ctx.settings.config.cache.container_list_ttl_s),
        def,
        Args::new(),
        |lines| {
            let mut names: Vec<String> = lines
                .iter()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect();
            names.sort();
            Ok(names)
        },
    )
    .await
}

/// Like [`vm_list`], always asking libvirt.
pub async fn vm_list_fresh(ctx: &Context) -> Result<Vec<String>, ManageError> {
    ctx.cache.invalidate_family(keys::VM_LIST);
    vm_list(ctx).await
}

// ── machine-status ───────────────────────────────────────

fn machine_info_action() -> ActionDefinition {
    let mut def = ActionDefinition::command(
        "machine-info",
        "Machine Info",
        Category::Nixos,
        vec![CommandStep::shell(MACHINE_INFO)],
    );
    def.timeout = MACHINE_INFO_TIMEOUT;
    def
}

/// How a machine's details can be read.
fn status_target(ctx: &Context, machine: &str, local: Option<&str>) -> Option<(Target, &'static str)> {
    if local == Some(machine) {
        return Some((Target::Local, "✓ Local (this machine)"));
    }
    match ctx.remotes.get(machine) {
        Ok(remote) if remote.enabled => Some((Target::Remote(remote.clone()), "✓ Online")),
        _ => None,
    }
}

/// One block per known machine: the local host is read directly, machines
/// with a configured remote over ssh, the rest are reported as unknown.
pub async fn machine_status(
    ctx: &Context,
    local: Option<&str>,
    on_line: LineSink<'_>,
    options: &ExecOptions,
) -> Result<ExecutionResult, ManageError> {
    let started = Instant::now();
    let machines = known_machines(ctx).await?;
    let info = machine_info_action();
    let mut lines = Vec::new();
    let mut say = |lines: &mut Vec<String>, text: String| {
        emit(on_line, Stream::Stdout, text.clone());
        lines.push(text);
    };

    for machine in &machines {
        if options.cancel.is_cancelled() {
            return Ok(ExecutionResult {
                cancelled: true,
                ..synthetic("machine-status", crate::exec::EXIT_CANCELLED, lines, Vec::new(), started)
            });
        }
        say(&mut lines, format!("┌ {machine}"));
        match status_target(ctx, machine, local) {
            None => say(&mut lines, "│ Status:      ? no remote configured".into()),
            Some((target, online)) => {
                let reply = ctx.executor.capture(&info, &Args::new(), &target, options).await;
                let up = matches!(&reply, Ok((r, _)) if r.success());
                if let Target::Remote(remote) = &target {
                    ctx.remotes.set_reachable(&remote.name, up);
                }
                match reply {
                    Ok((result, _)) if result.cancelled => continue,
                    Ok((_, details)) if up => {
                        say(&mut lines, format!("│ Status:      {online}"));
                        for detail in details.iter().filter(|d| !d.trim().is_empty()) {
                            say(&mut lines, format!("│ {}", detail.trim_end()));
                        }
                    }
                    _ => say(&mut lines, "│ Status:      ✗ Offline or unreachable".into()),
                }
            }
        }
        say(&mut lines, "└".into());
    }

    Ok(synthetic("machine-status", 0, lines, Vec::new(), started))
}

// ── rebuild-all ──────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RebuildReport {
    pub built: Vec<String>,
    pub failed: Vec<String>,
    pub cancelled: bool,
    started: Option<Instant>,
}

impl RebuildReport {
    pub fn record(&mut self, machine: &str, ok: bool) {
        if ok {
            self.built.push(machine.to_string());
        } else {
            self.failed.push(machine.to_string());
        }
    }

    pub fn into_result(self) -> Result<(), ManageError> {
        if self.cancelled {
            return Err(ManageError::Cancelled {
                command: "rebuild-all".into(),
            });
        }
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(ManageError::RebuildFailed {
                count: self.failed.len(),
                failed: self.failed.join(", "),
            })
        }
    }

    fn into_execution_result(self) -> ExecutionResult {
        let started = self.started.unwrap_or_else(Instant::now);
        let exit_code = if self.failed.is_empty() { 0 } else { 1 };
        let stderr = if self.failed.is_empty() {
            Vec::new()
        } else {
            vec![format!("failed: {}", self.failed.join(", "))]
        };
        ExecutionResult {
            cancelled: self.cancelled,
            exit_code: if self.cancelled { crate::exec::EXIT_CANCELLED } else { exit_code },
            ..synthetic("rebuild-all", exit_code, self.built, stderr, started)
        }
    }
}

/// Build one machine's configuration with the `build` action.
pub async fn build_machine(
    ctx: &Context,
    machine: &str,
    target: &Target,
    on_line: LineSink<'_>,
    options: &ExecOptions,
) -> Result<ExecutionResult, ManageError> {
    let def = ctx.registry.lookup("build")?;
    let mut args = Args::new();
    args.insert("machine".into(), machine.to_string());
    ctx.executor.execute(def, &args, target, on_line, options).await
}

/// Build every known machine, continuing past failures.
pub async fn rebuild_all(
    ctx: &Context,
    target: &Target,
    on_line: LineSink<'_>,
    options: &ExecOptions,
) -> Result<RebuildReport, ManageError> {
    let machines = known_machines(ctx).await?;
    let mut report = RebuildReport {
        started: Some(Instant::now()),
        ..RebuildReport::default()
    };

    for machine in &machines {
        if options.cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        emit(on_line, Stream::Stdout, format!("Building {machine}..."));
        let ok = match build_machine(ctx, machine, target, on_line, options).await {
            Ok(result) if result.cancelled => {
                report.cancelled = true;
                break;
            }
            Ok(result) if result.success() => {
                emit(on_line, Stream::Stdout, format!("✓ {machine} built successfully"));
                true
            }
            Ok(result) => {
                let why = if result.timed_out {
                    "timed out".to_string()
                } else {
                    format!("exit code {}", result.exit_code)
                };
                emit(on_line, Stream::Stderr, format!("✗ {machine} failed ({why})"));
                false
            }
            Err(e) => {
                emit(on_line, Stream::Stderr, format!("✗ {machine} error: {e}"));
                false
            }
        };
        report.record(machine, ok);
    }

    tracing::info!(
        built = report.built.len(),
        failed = report.failed.len(),
        cancelled = report.cancelled,
        "rebuild-all finished"
    );
    Ok(report)
}
