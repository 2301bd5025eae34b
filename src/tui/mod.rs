//! Terminal UI. A single loop multiplexes terminal input, messages from
//! background runs and a render tick; every command runs on its own task.

mod app;
mod ui;

use std::collections::HashMap;
use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::cursor::{Hide, Show};
use crossterm::event::{Event as TermEvent, EventStream};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use futures_util::StreamExt as _;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::dispatch::{Effect, Event, RunId, RunOutcome};
use crate::error::ManageError;
use crate::exec::{Args, ExecOptions, ExecutionResult, KILL_GRACE, OutputLine, Target};
use crate::{ops, paths, prefs, remote, vm};

use app::{App, Intent, LogKind};

const TICK: Duration = Duration::from_millis(100);

/// How long quitting waits for cancelled runs to stop their processes.
const SHUTDOWN_GRACE: Duration = KILL_GRACE.saturating_add(Duration::from_secs(1));

type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Messages from background tasks to the UI loop.
enum Message {
    Spawned(RunId),
    Line { run: RunId, line: OutputLine },
    Done {
        run: RunId,
        result: Result<ExecutionResult, ManageError>,
    },
    Options {
        name: String,
        options: Vec<String>,
    },
    Pinged {
        name: String,
        up: bool,
    },
}

fn terminal_err(e: io::Error) -> ManageError {
    ManageError::Terminal {
        message: e.to_string(),
    }
}

// ── Terminal setup ───────────────────────────────────────

fn enter_terminal() -> Result<(), ManageError> {
    enable_raw_mode().map_err(terminal_err)?;
    execute!(io::stdout(), EnterAlternateScreen, Hide).map_err(terminal_err)
}

fn leave_terminal() -> Result<(), ManageError> {
    disable_raw_mode().map_err(terminal_err)?;
    execute!(io::stdout(), LeaveAlternateScreen, Show).map_err(terminal_err)
}

fn init_terminal() -> Result<Tui, ManageError> {
    enter_terminal()?;

    // Put the terminal back before the panic message is printed.
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = leave_terminal();
        previous(info);
    }));

    Terminal::new(CrosstermBackend::new(io::stdout())).map_err(terminal_err)
}

// ── Runtime ──────────────────────────────────────────────

struct Runtime {
    ctx: Context,
    target: Target,
    tx: mpsc::UnboundedSender<Message>,
    runs: HashMap<RunId, (CancellationToken, JoinHandle<()>)>,
    /// Held open so the copied text stays available on X11.
    clipboard: Option<arboard::Clipboard>,
}

impl Runtime {
    fn on_intent(&mut self, app: &mut App, intent: Intent) -> Vec<Effect> {
        match intent {
            Intent::Quit => Vec::new(),
            Intent::Effects(effects) => effects,
            Intent::ClearCache => {
                self.ctx.cache.clear();
                app.push_log(LogKind::Info, "Cache cleared");
                app.status = "Cache cleared".into();
                Vec::new()
            }
            Intent::PingRemotes => {
                self.ping_remotes(app);
                Vec::new()
            }
            Intent::MachineChanged(machine) => {
                if let Err(e) = prefs::save_last_machine(&paths::prefs_file(), &machine) {
                    tracing::warn!(error = %e, "could not save last machine");
                }
                Vec::new()
            }
            Intent::CopyLog(text) => {
                let lines = text.lines().count();
                app.status = match self.copy(text) {
                    Ok(()) => format!("Copied {lines} line(s) to the clipboard"),
                    Err(e) => {
                        tracing::warn!(error = %e, "clipboard copy failed");
                        format!("Copy failed: {e}")
                    }
                };
                Vec::new()
            }
        }
    }

    fn copy(&mut self, text: String) -> Result<(), arboard::Error> {
        let clipboard = match &mut self.clipboard {
            Some(clipboard) => clipboard,
            slot => slot.insert(arboard::Clipboard::new()?),
        };
        clipboard.set_text(text)
    }

    fn on_message(&mut self, app: &mut App, message: Message) -> Vec<Effect> {
        match message {
            Message::Spawned(run) => app.dispatch(Event::Spawned(run)),
            Message::Line { run, line } => {
                app.push_output(run, line);
                Vec::new()
            }
            Message::Done { run, result } => {
                self.runs.remove(&run);
                match result {
                    Ok(result) => {
                        tracing::debug!(run, exit_code = result.exit_code, "run done");
                        let outcome = RunOutcome::from(&result);
                        app.dispatch(Event::Finished { run, outcome })
                    }
                    Err(e) => app.dispatch(Event::Failed {
                        run,
                        message: e.to_string(),
                    }),
                }
            }
            Message::Options { name, options } => {
                app.set_pick_options(&name, options);
                Vec::new()
            }
            Message::Pinged { name, up } => {
                app.set_reachable(&name, up);
                if up {
                    app.push_log(LogKind::Info, format!("✓ remote {name} is reachable"));
                } else {
                    app.push_log(LogKind::Error, format!("✗ remote {name} is unreachable"));
                }
                Vec::new()
            }
        }
    }

    /// Carry out effects; any follow-up effects are carried too.
    async fn carry(
        &mut self,
        app: &mut App,
        terminal: &mut Tui,
        effects: Vec<Effect>,
    ) -> Result<(), ManageError> {
        let mut queue: std::collections::VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Start { run, action, args } => {
                    let follow = self.start(app, terminal, run, action, args).await?;
                    queue.extend(follow);
                }
                Effect::Cancel { run } => {
                    if let Some((token, _)) = self.runs.get(&run) {
                        token.cancel();
                        app.status = "Cancelling...".into();
                    }
                }
                Effect::Invalidate(keys) => {
                    for key in &keys {
                        self.ctx.cache.invalidate_family(key);
                    }
                    if !keys.is_empty() {
                        tracing::debug!(?keys, "cache invalidated");
                    }
                }
                Effect::PickArgument { name, .. } => self.load_options(&name),
                // Shown by the app already.
                Effect::ShowError(_) | Effect::Notice(_) | Effect::Confirm { .. } => {}
            }
        }
        Ok(())
    }

    async fn start(
        &mut self,
        app: &mut App,
        terminal: &mut Tui,
        run: RunId,
        action: String,
        args: Args,
    ) -> Result<Vec<Effect>, ManageError> {
        let args = if action == "create-vm" && !args.contains_key("name") {
            match self.vm_wizard(terminal).await? {
                Ok(args) => args,
                Err(e) => {
                    let message = match e {
                        ManageError::PromptCancelled => "VM creation cancelled".to_string(),
                        other => other.to_string(),
                    };
                    return Ok(app.dispatch(Event::Failed { run, message }));
                }
            }
        } else {
            args
        };

        let cancel = CancellationToken::new();
        let options = ExecOptions {
            timeout: None,
            cancel: cancel.clone(),
        };

        let ctx = self.ctx.clone();
        let target = self.target.clone();
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let _ = tx.send(Message::Spawned(run));
            let lines = tx.clone();
            let result = ops::run_action(
                &ctx,
                &action,
                &args,
                &target,
                &mut |line: OutputLine| {
                    let _ = lines.send(Message::Line { run, line });
                },
                &options,
            )
            .await;
            let _ = tx.send(Message::Done { run, result });
        });
        self.runs.insert(run, (cancel, handle));
        Ok(Vec::new())
    }

    /// Suspend the UI and ask for the VM parameters. The outer error is a
    /// terminal failure; the inner one is the wizard's.
    async fn vm_wizard(&self, terminal: &mut Tui) -> Result<Result<Args, ManageError>, ManageError> {
        let existing = ops::vm_list(&self.ctx).await.unwrap_or_default();
        let defaults = self.ctx.settings.config.vm.clone();

        leave_terminal()?;
        let answer = tokio::task::block_in_place(|| vm::wizard(&defaults, &existing));
        enter_terminal()?;
        terminal.clear().map_err(terminal_err)?;

        Ok(answer.map(|request| request.to_args()))
    }

    fn load_options(&self, name: &str) {
        let ctx = self.ctx.clone();
        let tx = self.tx.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let options = match name.as_str() {
                "vm" => ops::vm_list(&ctx).await,
                "machine" => ops::known_machines(&ctx).await,
                "container" => ops::containers(&ctx).await,
                _ => return,
            };
            match options {
                Ok(options) => {
                    let _ = tx.send(Message::Options { name, options });
                }
                Err(e) => tracing::warn!(error = %e, "could not load choices for '{name}'"),
            }
        });
    }

    fn ping_remotes(&self, app: &mut App) {
        let remotes: Vec<_> = self.ctx.remotes.enabled().cloned().collect();
        if remotes.is_empty() {
            app.status = "No remotes configured".into();
            return;
        }
        app.status = format!("Pinging {} remote(s)...", remotes.len());
        for machine in remotes {
            let ctx = self.ctx.clone();
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let def = remote::ping_action();
                let name = machine.name.clone();
                let result = ctx
                    .executor
                    .execute(
                        &def,
                        &Args::new(),
                        &Target::Remote(machine),
                        &mut |_: OutputLine| {},
                        &ExecOptions::default(),
                    )
                    .await;
                let up = matches!(&result, Ok(r) if r.success());
                ctx.remotes.set_reachable(&name, up);
                let _ = tx.send(Message::Pinged { name, up });
            });
        }
    }

    /// Cancel every run and wait, bounded, for their processes to go.
    async fn shutdown(&mut self) {
        if self.runs.is_empty() {
            return;
        }
        tracing::info!(runs = self.runs.len(), "cancelling runs before exit");
        let handles: Vec<_> = self
            .runs
            .drain()
            .map(|(_, (token, handle))| {
                token.cancel();
                handle
            })
            .collect();
        let all = futures_util::future::join_all(handles);
        if tokio::time::timeout(SHUTDOWN_GRACE, all).await.is_err() {
            tracing::warn!("runs still stopping at exit");
        }
    }
}

/// Pick the starting machine: explicit, then the saved one, then this host.
async fn initial_machine(explicit: Option<String>, known: &[String]) -> Option<String> {
    let usable = |m: &String| known.is_empty() || known.contains(m);
    if let Some(m) = explicit.filter(usable) {
        return Some(m);
    }
    if let Some(m) = prefs::load_last_machine(&paths::prefs_file()).filter(usable) {
        return Some(m);
    }
    if let Ok(host) = ops::local_hostname().await
        && known.contains(&host)
    {
        return Some(host);
    }
    known.first().cloned()
}

pub async fn run(ctx: Context, target: Target, machine: Option<String>) -> Result<(), ManageError> {
    let machines = match ops::known_machines(&ctx).await {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "could not list machines");
            Vec::new()
        }
    };
    let machine = initial_machine(machine, &machines).await;
    let remotes = ctx.remotes.enabled().map(|m| m.name.clone()).collect();

    let mut app = App::new(ctx.registry.clone(), machines, machine, remotes);
    if let Target::Remote(m) = &target {
        app.push_log(LogKind::Info, format!("Commands run on remote '{}' ({})", m.name, m.host));
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut runtime = Runtime {
        ctx,
        target,
        tx,
        runs: HashMap::new(),
        clipboard: None,
    };

    let mut terminal = init_terminal()?;
    let result = event_loop(&mut app, &mut runtime, &mut terminal, &mut rx).await;
    runtime.shutdown().await;
    leave_terminal()?;
    result
}

async fn event_loop(
    app: &mut App,
    runtime: &mut Runtime,
    terminal: &mut Tui,
    rx: &mut mpsc::UnboundedReceiver<Message>,
) -> Result<(), ManageError> {
    let mut events = EventStream::new();
    let mut tick = tokio::time::interval(TICK);

    loop {
        terminal.draw(|f| ui::draw(f, app)).map_err(terminal_err)?;

        let effects = tokio::select! {
            event = events.next() => match event {
                Some(Ok(TermEvent::Key(key))) => match app.on_key(key) {
                    Some(Intent::Quit) => break,
                    Some(intent) => runtime.on_intent(app, intent),
                    None => Vec::new(),
                },
                Some(Ok(_)) => Vec::new(),
                Some(Err(e)) => return Err(terminal_err(e)),
                None => break,
            },
            Some(message) = rx.recv() => runtime.on_message(app, message),
            _ = tick.tick() => {
                app.tick();
                Vec::new()
            }
        };

        runtime.carry(app, terminal, effects).await?;
    }

    tracing::info!("tui exiting");
    Ok(())
}
