//! The command executor.
//!
//! Every action that spawns a process goes through [`Executor::execute`]:
//! placeholders are substituted into discrete argument vectors, the process
//! runs in its own process group with piped output, lines are forwarded as
//! they arrive, and timeout or cancellation tears down the whole group.

use std::collections::{BTreeMap, VecDeque};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::ManageError;
use crate::logging::RunLog;
use crate::registry::{ActionDefinition, CommandStep};
use crate::remote::{RemoteMachine, ResolvedStep};
use crate::util::shell_join;

/// Lines kept per stream in an [`ExecutionResult`].
pub const TAIL_LINES: usize = 200;
/// Delay between SIGTERM and SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

pub const EXIT_TIMED_OUT: i32 = -1;
pub const EXIT_CANCELLED: i32 = -2;

/// Placeholder values keyed by name.
pub type Args = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub enum Target {
    #[default]
    Local,
    Remote(RemoteMachine),
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Overrides the definition's timeout.
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl ExecOptions {
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
    /// Display form of what ran, steps joined with `&&`.
    pub command: String,
    pub timeout: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.cancelled
    }

    /// Turn a non-successful result into the matching error.
    pub fn into_outcome(self) -> Result<ExecutionResult, ManageError> {
        if self.cancelled {
            Err(ManageError::Cancelled {
                command: self.command,
            })
        } else if self.timed_out {
            Err(ManageError::Timeout {
                command: self.command,
                seconds: self.timeout.as_secs(),
            })
        } else if self.exit_code != 0 {
            Err(ManageError::NonZeroExit {
                command: self.command,
                code: self.exit_code,
                stderr_tail: self.stderr_tail.join("\n"),
            })
        } else {
            Ok(self)
        }
    }
}

/// Bounded ring of the most recent lines.
#[derive(Debug, Default)]
struct Tail(VecDeque<String>);

impl Tail {
    fn push(&mut self, line: String) {
        if self.0.len() == TAIL_LINES {
            self.0.pop_front();
        }
        self.0.push_back(line);
    }

    fn into_vec(self) -> Vec<String> {
        self.0.into()
    }
}

/// How a single step ended.
enum StepEnd {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

// ── substitution ─────────────────────────────────────────

/// Single pass: substituted values are never re-scanned.
fn substitute(template: &str, args: &Args) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}').and_then(|end| Some((end, args.get(&after[..end])?))) {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Substitute placeholders in every step; fails before anything runs if an
/// argument is missing.
pub fn resolve_steps(def: &ActionDefinition, args: &Args) -> Result<Vec<ResolvedStep>, ManageError> {
    if let Some(name) = def.placeholders().into_iter().find(|p| !args.contains_key(p)) {
        return Err(ManageError::MissingArgument {
            action: def.id.clone(),
            name,
        });
    }
    Ok(def
        .steps()
        .iter()
        .map(|step| match step {
            CommandStep::Argv(argv) => {
                ResolvedStep::Argv(argv.iter().map(|a| substitute(a, args)).collect())
            }
            CommandStep::TrustedShell(pipeline) => ResolvedStep::Shell(pipeline.clone()),
        })
        .collect())
}

/// Local argv for a resolved step on `target`.
fn local_argv(step: &ResolvedStep, target: &Target) -> Vec<String> {
    match target {
        Target::Remote(machine) => machine.wrap(step),
        Target::Local => match step {
            ResolvedStep::Argv(argv) => argv.clone(),
            ResolvedStep::Shell(pipeline) => {
                vec!["sh".to_string(), "-c".to_string(), pipeline.clone()]
            }
        },
    }
}

// ── Executor ─────────────────────────────────────────────

pub struct Executor {
    workdir: PathBuf,
    run_logs: Option<PathBuf>,
    spawned: AtomicUsize,
}

impl Executor {
    /// Commands run in `workdir` (the flake) when it exists.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            run_logs: None,
            spawned: AtomicUsize::new(0),
        }
    }

    /// Tee every run into a log file under `dir`.
    pub fn with_run_logs(mut self, dir: impl Into<PathBuf>) -> Self {
        self.run_logs = Some(dir.into());
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Number of processes spawned so far.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    pub async fn execute(
        &self,
        def: &ActionDefinition,
        args: &Args,
        target: &Target,
        on_line: &mut (dyn FnMut(OutputLine) + Send),
        options: &ExecOptions,
    ) -> Result<ExecutionResult, ManageError> {
        let steps = resolve_steps(def, args)?;
        let argvs: Vec<Vec<String>> = steps.iter().map(|s| local_argv(s, target)).collect();
        let command = argvs
            .iter()
            .map(|a| shell_join(a))
            .collect::<Vec<_>>()
            .join(" && ");

        let limit = options.timeout.unwrap_or(def.timeout);
        let started = Instant::now();
        let deadline = started + limit;

        let mut log = self.open_run_log(&def.id);
        if let Some(log) = log.as_mut() {
            log.note(&command);
        }

        tracing::info!(action = %def.id, %command, timeout_s = limit.as_secs(), "running");

        let mut stdout = Tail::default();
        let mut stderr = Tail::default();
        let mut end = StepEnd::Exited(ExitStatus::from_raw(0));

        for argv in &argvs {
            let mut deliver = |line: OutputLine| {
                if let Some(log) = log.as_mut() {
                    log.write_line(line.stream, &line.text);
                }
                match line.stream {
                    Stream::Stdout => stdout.push(line.text.clone()),
                    Stream::Stderr => stderr.push(line.text.clone()),
                }
                on_line(line);
            };
            let step_end = match self
                .run_step(argv, deadline, &options.cancel, &mut deliver)
                .await
            {
                Ok(e) => e,
                Err(e) => {
                    if let Some(mut log) = log.take() {
                        log.note(&e.to_string());
                        log.finish(false);
                    }
                    return Err(e);
                }
            };
            let stop = !matches!(&step_end, StepEnd::Exited(s) if s.success());
            end = step_end;
            if stop {
                break;
            }
        }

        let (exit_code, timed_out, cancelled) = match end {
            StepEnd::Exited(status) => (exit_code_of(status), false, false),
            StepEnd::TimedOut => (EXIT_TIMED_OUT, true, false),
            StepEnd::Cancelled => (EXIT_CANCELLED, false, true),
        };

        let result = ExecutionResult {
            exit_code,
            stdout_tail: stdout.into_vec(),
            stderr_tail: stderr.into_vec(),
            timed_out,
            cancelled,
            duration_ms: started.elapsed().as_millis() as u64,
            command,
            timeout: limit,
        };

        if let Some(mut log) = log {
            log.note(&format!(
                "exit {} after {}ms{}{}",
                result.exit_code,
                result.duration_ms,
                if timed_out { " (timed out)" } else { "" },
                if cancelled { " (cancelled)" } else { "" },
            ));
            log.finish(result.success());
        }

        tracing::info!(
            action = %def.id,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            timed_out,
            cancelled,
            "finished"
        );
        Ok(result)
    }

    /// Run and collect stdout lines.
    pub async fn capture(
        &self,
        def: &ActionDefinition,
        args: &Args,
        target: &Target,
        options: &ExecOptions,
    ) -> Result<(ExecutionResult, Vec<String>), ManageError> {
        let mut lines = Vec::new();
        let result = self
            .execute(
                def,
                args,
                target,
                &mut |line: OutputLine| {
                    if line.stream == Stream::Stdout {
                        lines.push(line.text);
                    }
                },
                options,
            )
            .await?;
        Ok((result, lines))
    }

    fn open_run_log(&self, action: &str) -> Option<RunLog> {
        let dir = self.run_logs.as_ref()?;
        match RunLog::create(dir, action) {
            Ok(log) => Some(log),
            Err(e) => {
                tracing::warn!(action, error = %e, "could not create run log");
                None
            }
        }
    }

    async fn run_step(
        &self,
        argv: &[String],
        deadline: Instant,
        cancel: &CancellationToken,
        deliver: &mut (dyn FnMut(OutputLine) + Send),
    ) -> Result<StepEnd, ManageError> {
        let rendered = shell_join(argv);
        let (program, rest) = argv.split_first().ok_or_else(|| ManageError::Validation {
            message: "empty command".into(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if self.workdir.is_dir() {
            cmd.current_dir(&self.workdir);
        }

        let mut child = cmd.spawn().map_err(|source| ManageError::SpawnFailure {
            command: rendered.clone(),
            source,
        })?;
        self.spawned.fetch_add(1, Ordering::Relaxed);
        let pgid = child.id();
        let mut guard = GroupGuard(pgid);
        tracing::debug!(command = %rendered, pid = ?pgid, "spawned");

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(out) = child.stdout.take() {
            tokio::spawn(forward_lines(out, Stream::Stdout, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(forward_lines(err, Stream::Stderr, tx.clone()));
        }
        drop(tx);

        // Pump output until both streams close, then wait for exit.
        let interrupted = loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => deliver(line),
                    None => break None,
                },
                _ = sleep_until(deadline) => break Some(StepEnd::TimedOut),
                _ = cancel.cancelled() => break Some(StepEnd::Cancelled),
            }
        };

        let end = match interrupted {
            Some(end) => end,
            None => tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|source| ManageError::Io {
                        context: format!("waiting for `{rendered}`"),
                        source,
                    })?;
                    guard.disarm();
                    return Ok(StepEnd::Exited(status));
                }
                _ = sleep_until(deadline) => StepEnd::TimedOut,
                _ = cancel.cancelled() => StepEnd::Cancelled,
            },
        };

        match &end {
            StepEnd::TimedOut => tracing::warn!(command = %rendered, "timed out, terminating"),
            StepEnd::Cancelled => tracing::info!(command = %rendered, "cancelled, terminating"),
            StepEnd::Exited(_) => {}
        }
        terminate(&mut child, pgid).await;
        guard.disarm();

        while let Ok(line) = rx.try_recv() {
            deliver(line);
        }
        Ok(end)
    }
}

async fn forward_lines<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut split = BufReader::new(reader).split(b'\n');
    while let Ok(Some(bytes)) = split.next_segment().await {
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        if text.ends_with('\r') {
            text.pop();
        }
        if tx.send(OutputLine { stream, text }).is_err() {
            break;
        }
    }
}

fn signal_group(pgid: u32, signal: libc::c_int) {
    // SAFETY: killpg has no memory-safety preconditions; failure (ESRCH)
    // just means the group is already gone.
    unsafe {
        libc::killpg(pgid as libc::pid_t, signal);
    }
}

/// SIGKILLs the process group if a run is dropped before it was reaped,
/// e.g. when the runtime shuts down mid-run. `kill_on_drop` alone only
/// reaches the group leader.
struct GroupGuard(Option<u32>);

impl GroupGuard {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.0.take() {
            tracing::debug!(pgid, "run dropped, killing process group");
            signal_group(pgid, libc::SIGKILL);
        }
    }
}

/// SIGTERM the group, SIGKILL after the grace period, then reap.
async fn terminate(child: &mut Child, pgid: Option<u32>) {
    let Some(pgid) = pgid else {
        let _ = child.kill().await;
        return;
    };
    signal_group(pgid, libc::SIGTERM);
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
        return;
    }
    tracing::debug!(pgid, "still alive after grace period, sending SIGKILL");
    signal_group(pgid, libc::SIGKILL);
    let _ = child.wait().await;
}

fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Category;

    fn action(steps: Vec<CommandStep>) -> ActionDefinition {
        ActionDefinition::command("test", "Test", Category::System, steps)
    }

    fn executor() -> Executor {
        Executor::new(std::env::temp_dir())
    }

    fn args(pairs: &[(&str, &str)]) -> Args {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn echo_substitutes_placeholder() {
        let exec = executor();
        let def = action(vec![CommandStep::argv(&["echo", "{name}"])]);
        let mut seen = Vec::new();
        let result = exec
            .execute(
                &def,
                &args(&[("name", "x")]),
                &Target::Local,
                &mut |l: OutputLine| seen.push(l),
                &ExecOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.success());
        assert_eq!(result.stdout_tail, vec!["x"]);
        assert_eq!(
            seen,
            vec![OutputLine {
                stream: Stream::Stdout,
                text: "x".into()
            }]
        );
    }

    #[tokio::test]
    async fn placeholder_value_is_one_argument() {
        let exec = executor();
        let def = action(vec![CommandStep::argv(&["printf", "%s\\n", "{name}"])]);
        let (_, lines) = exec
            .capture(
                &def,
                &args(&[("name", "a b; echo pwned")]),
                &Target::Local,
                &ExecOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(lines, vec!["a b; echo pwned"]);
    }

    #[tokio::test]
    async fn missing_argument_spawns_nothing() {
        let exec = executor();
        let def = action(vec![CommandStep::argv(&["echo", "{name}"])]);
        let err = exec
            .execute(
                &def,
                &Args::new(),
                &Target::Local,
                &mut |_| {},
                &ExecOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ManageError::MissingArgument { ref name, .. } if name == "name"));
        assert_eq!(exec.spawned(), 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let exec = executor();
        let def = action(vec![CommandStep::shell("echo oops >&2; exit 3")]);
        let result = exec
            .execute(&def, &Args::new(), &Target::Local, &mut |_| {}, &ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr_tail, vec!["oops"]);

        let err = result.into_outcome().unwrap_err();
        assert!(matches!(err, ManageError::NonZeroExit { code: 3, .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn steps_stop_at_first_failure() {
        let exec = executor();
        let def = action(vec![
            CommandStep::argv(&["echo", "one"]),
            CommandStep::argv(&["false"]),
            CommandStep::argv(&["echo", "three"]),
        ]);
        let result = exec
            .execute(&def, &Args::new(), &Target::Local, &mut |_| {}, &ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stdout_tail, vec!["one"]);
        assert_eq!(exec.spawned(), 2);
        assert_eq!(result.command, "echo one && false && echo three");
    }

    #[tokio::test]
    async fn spawn_failure_names_the_command() {
        let exec = executor();
        let def = action(vec![CommandStep::argv(&["definitely-not-a-real-binary-xyz"])]);
        let err = exec
            .execute(&def, &Args::new(), &Target::Local, &mut |_| {}, &ExecOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ManageError::SpawnFailure { ref command, .. } if command == "definitely-not-a-real-binary-xyz"));
    }

    /// Running, or at least not yet a zombie waiting for its reaper.
    fn process_alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let exec = executor();
        let def = action(vec![CommandStep::shell("echo $$; exec sleep 30")]);
        let (result, lines) = exec
            .capture(
                &def,
                &Args::new(),
                &Target::Local,
                &ExecOptions::with_timeout(Some(Duration::from_secs(1))),
            )
            .await
            .unwrap();

        assert!(result.timed_out);
        assert!(!result.cancelled);
        assert_eq!(result.exit_code, EXIT_TIMED_OUT);
        assert!(result.duration_ms < 10_000);

        let pid: i32 = lines[0].parse().unwrap();
        assert!(!process_alive(pid), "process {pid} survived the timeout");
        assert!(matches!(
            result.into_outcome(),
            Err(ManageError::Timeout { seconds: 1, .. })
        ));
    }

    #[tokio::test]
    async fn timeout_reaches_the_whole_group() {
        let exec = executor();
        // The background sleep keeps the pipes open after the shell is killed.
        let def = action(vec![CommandStep::shell("sleep 30 & echo $!; wait")]);
        let (result, lines) = exec
            .capture(
                &def,
                &Args::new(),
                &Target::Local,
                &ExecOptions::with_timeout(Some(Duration::from_secs(1))),
            )
            .await
            .unwrap();
        assert!(result.timed_out);
        let pid: i32 = lines[0].parse().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!process_alive(pid), "grandchild {pid} survived the timeout");
    }

    #[test]
    fn dropped_run_kills_the_group() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (pid_tx, pid_rx) = std::sync::mpsc::channel::<String>();
        rt.spawn(async move {
            let exec = executor();
            let def = action(vec![CommandStep::shell("sleep 30 & echo $!; wait")]);
            let _ = exec
                .execute(
                    &def,
                    &Args::new(),
                    &Target::Local,
                    &mut |l: OutputLine| {
                        let _ = pid_tx.send(l.text);
                    },
                    &ExecOptions::default(),
                )
                .await;
        });
        let pid: i32 = pid_rx
            .recv_timeout(Duration::from_secs(10))
            .unwrap()
            .parse()
            .unwrap();

        // Shutting the runtime down drops the run mid-flight.
        drop(rt);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while process_alive(pid) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(!process_alive(pid), "grandchild {pid} outlived the runtime");
    }

    #[tokio::test]
    async fn cancellation_is_distinct_from_timeout() {
        let exec = executor();
        let def = action(vec![CommandStep::argv(&["sleep", "30"])]);
        let options = ExecOptions::default();
        let token = options.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            token.cancel();
            // Second cancel is a no-op.
            token.cancel();
        });

        let result = exec
            .execute(&def, &Args::new(), &Target::Local, &mut |_| {}, &options)
            .await
            .unwrap();
        assert!(result.cancelled);
        assert!(!result.timed_out);
        assert_eq!(result.exit_code, EXIT_CANCELLED);
        assert!(matches!(
            result.into_outcome(),
            Err(ManageError::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn tails_are_bounded() {
        let exec = executor();
        let def = action(vec![CommandStep::shell("seq 1 500")]);
        let result = exec
            .execute(&def, &Args::new(), &Target::Local, &mut |_| {}, &ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(result.stdout_tail.len(), TAIL_LINES);
        assert_eq!(result.stdout_tail.first().map(String::as_str), Some("301"));
        assert_eq!(result.stdout_tail.last().map(String::as_str), Some("500"));
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily() {
        let exec = executor();
        let def = action(vec![CommandStep::shell("printf 'ok\\377\\n'")]);
        let (_, lines) = exec
            .capture(&def, &Args::new(), &Target::Local, &ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(lines, vec!["ok\u{FFFD}"]);
    }

    #[tokio::test]
    async fn run_logs_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor().with_run_logs(dir.path());
        let def = action(vec![CommandStep::argv(&["echo", "logged"])]);
        exec.execute(&def, &Args::new(), &Target::Local, &mut |_| {}, &ExecOptions::default())
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let path = entries[0].as_ref().unwrap().path();
        assert!(path.to_string_lossy().ends_with("_test_ok.log"));
        assert!(std::fs::read_to_string(path).unwrap().contains("logged"));
    }

    #[test]
    fn substitution_is_single_pass() {
        let a = args(&[("machine", "{vm}"), ("vm", "oops")]);
        assert_eq!(substitute(".#{machine}", &a), ".#{vm}");
        assert_eq!(substitute("awk '{print $1}'", &a), "awk '{print $1}'");
        assert_eq!(substitute("{machine}-{vm}", &a), "{vm}-oops");
    }

    #[test]
    fn remote_target_wraps_in_ssh() {
        let machine = crate::remote::tests::remote("superheavy");
        let step = ResolvedStep::Argv(vec!["uptime".into()]);
        let argv = local_argv(&step, &Target::Remote(machine));
        assert_eq!(argv[0], "ssh");
        assert_eq!(argv.last().unwrap(), "uptime");
    }
}
