use std::collections::VecDeque;
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::dispatch::{Dispatcher, Effect, Event, RunId};
use crate::exec::{OutputLine, Stream};
use crate::registry::{ActionDefinition, Category, Registry};

/// Lines kept in the log view.
pub const LOG_LIMIT: usize = 2000;

pub const SPINNER: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Stdout,
    Stderr,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub kind: LogKind,
    pub text: String,
    /// Action that produced the line, for command output.
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popup {
    None,
    Confirm { label: String },
    /// Quitting would cancel this many runs.
    ConfirmQuit { running: usize },
    Pick(Picker),
}

/// Argument picker: a list of known values plus free-text input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picker {
    pub action: String,
    pub name: String,
    pub options: Vec<String>,
    pub selected: usize,
    pub input: String,
}

impl Picker {
    fn value(&self) -> Option<String> {
        if !self.input.is_empty() {
            Some(self.input.clone())
        } else {
            self.options.get(self.selected).cloned()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    pub name: String,
    pub reachable: Option<bool>,
}

/// What a key press asks the event loop to do.
#[derive(Debug, PartialEq, Eq)]
pub enum Intent {
    Quit,
    Effects(Vec<Effect>),
    ClearCache,
    PingRemotes,
    MachineChanged(String),
    CopyLog(String),
}

pub struct App {
    registry: Arc<Registry>,
    pub dispatcher: Dispatcher,
    pub tabs: Vec<Category>,
    pub tab: usize,
    /// Selected row per tab.
    pub selected: Vec<usize>,
    pub log: VecDeque<LogLine>,
    /// Lines scrolled up from the bottom of the log.
    pub scroll: usize,
    pub machines: Vec<String>,
    pub remotes: Vec<RemoteStatus>,
    pub popup: Popup,
    pub status: String,
    pub spinner: usize,
}

impl App {
    pub fn new(
        registry: Arc<Registry>,
        machines: Vec<String>,
        machine: Option<String>,
        remotes: Vec<String>,
    ) -> Self {
        let tabs = registry.categories();
        let dispatcher = Dispatcher::new(registry.clone(), machine);
        Self {
            registry,
            dispatcher,
            selected: vec![0; tabs.len()],
            tabs,
            tab: 0,
            log: VecDeque::new(),
            scroll: 0,
            machines,
            remotes: remotes
                .into_iter()
                .map(|name| RemoteStatus {
                    name,
                    reachable: None,
                })
                .collect(),
            popup: Popup::None,
            status: "Ready".into(),
            spinner: 0,
        }
    }

    // ── Queries ─────────────────────────────────────────

    pub fn category(&self) -> Option<Category> {
        self.tabs.get(self.tab).copied()
    }

    pub fn actions(&self) -> Vec<&ActionDefinition> {
        match self.category() {
            Some(c) => self.registry.list(Some(c)),
            None => Vec::new(),
        }
    }

    pub fn selected_index(&self) -> usize {
        self.selected.get(self.tab).copied().unwrap_or(0)
    }

    pub fn selected_action(&self) -> Option<&ActionDefinition> {
        self.actions().get(self.selected_index()).copied()
    }

    pub fn machine(&self) -> Option<&str> {
        self.dispatcher.machine()
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.state().is_running()
    }

    /// Labels of every run in flight.
    pub fn running_labels(&self) -> Vec<&str> {
        self.dispatcher
            .state()
            .in_flight
            .iter()
            .map(|f| f.label.as_str())
            .collect()
    }

    pub fn spinner_frame(&self) -> char {
        SPINNER[self.spinner % SPINNER.len()]
    }

    // ── Log ─────────────────────────────────────────────

    pub fn push_log(&mut self, kind: LogKind, text: impl Into<String>) {
        self.push_line(LogLine {
            kind,
            text: text.into(),
            source: None,
        });
    }

    fn push_line(&mut self, line: LogLine) {
        if self.log.len() >= LOG_LIMIT {
            self.log.pop_front();
        }
        self.log.push_back(line);
    }

    /// Output of `run`, tagged with its action id.
    pub fn push_output(&mut self, run: RunId, line: OutputLine) {
        let kind = match line.stream {
            Stream::Stdout => LogKind::Stdout,
            Stream::Stderr => LogKind::Stderr,
        };
        let source = self
            .dispatcher
            .state()
            .in_flight
            .iter()
            .find(|f| f.run == run)
            .map(|f| f.action.clone());
        self.push_line(LogLine {
            kind,
            text: line.text,
            source,
        });
    }

    /// The log as plain text, one line per entry.
    pub fn log_text(&self) -> String {
        let mut text = String::new();
        for line in &self.log {
            if let Some(source) = &line.source {
                text.push_str(source);
                text.push_str(": ");
            }
            text.push_str(&line.text);
            text.push('\n');
        }
        text
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
        self.scroll = 0;
    }

    pub fn tick(&mut self) {
        if self.is_running() {
            self.spinner = self.spinner.wrapping_add(1);
        }
    }

    // ── Events from the runtime ─────────────────────────

    /// Feed a dispatcher event and apply the UI side of its effects.
    pub fn dispatch(&mut self, event: Event) -> Vec<Effect> {
        let effects = self.dispatcher.handle(event);
        self.apply(effects)
    }

    /// Show errors, notices and popups; return the effects that need I/O.
    pub fn apply(&mut self, effects: Vec<Effect>) -> Vec<Effect> {
        let mut pending = Vec::new();
        for effect in effects {
            match effect {
                Effect::ShowError(message) => {
                    self.popup = Popup::None;
                    self.push_log(LogKind::Error, format!("✗ {message}"));
                    self.status = message;
                }
                Effect::Notice(message) => {
                    let kind = if message.starts_with('✗') {
                        LogKind::Error
                    } else {
                        LogKind::Info
                    };
                    self.push_log(kind, message.clone());
                    self.status = message;
                }
                Effect::Confirm { label, .. } => {
                    self.popup = Popup::Confirm { label };
                }
                Effect::PickArgument { action, name } => {
                    self.popup = Popup::Pick(Picker {
                        action: action.clone(),
                        name: name.clone(),
                        options: Vec::new(),
                        selected: 0,
                        input: String::new(),
                    });
                    pending.push(Effect::PickArgument { action, name });
                }
                Effect::Start { run, action, args } => {
                    self.popup = Popup::None;
                    self.scroll = 0;
                    let label = self
                        .registry
                        .lookup(&action)
                        .map(|d| d.label.clone())
                        .unwrap_or_else(|_| action.clone());
                    self.push_log(LogKind::Info, format!("▶ {label}"));
                    self.status = format!("Running {label}...");
                    pending.push(Effect::Start { run, action, args });
                }
                other => pending.push(other),
            }
        }
        pending
    }

    pub fn set_pick_options(&mut self, name: &str, options: Vec<String>) {
        if let Popup::Pick(picker) = &mut self.popup
            && picker.name == name
        {
            picker.options = options;
            picker.selected = 0;
        }
    }

    pub fn set_reachable(&mut self, name: &str, up: bool) {
        if let Some(remote) = self.remotes.iter_mut().find(|r| r.name == name) {
            remote.reachable = Some(up);
        }
    }

    // ── Keys ────────────────────────────────────────────

    pub fn on_key(&mut self, key: KeyEvent) -> Option<Intent> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        match &self.popup {
            Popup::Confirm { .. } => self.on_confirm_key(key),
            Popup::ConfirmQuit { .. } => self.on_quit_key(key),
            Popup::Pick(_) => self.on_pick_key(key),
            Popup::None => self.on_main_key(key),
        }
    }

    fn on_confirm_key(&mut self, key: KeyEvent) -> Option<Intent> {
        let answer = match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => true,
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => false,
            _ => return None,
        };
        self.popup = Popup::None;
        Some(Intent::Effects(self.dispatch(Event::Confirmed(answer))))
    }

    fn on_quit_key(&mut self, key: KeyEvent) -> Option<Intent> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => Some(Intent::Quit),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.popup = Popup::None;
                None
            }
            _ => None,
        }
    }

    fn on_pick_key(&mut self, key: KeyEvent) -> Option<Intent> {
        let Popup::Pick(picker) = &mut self.popup else {
            return None;
        };
        match key.code {
            KeyCode::Esc => {
                self.popup = Popup::None;
                Some(Intent::Effects(self.dispatch(Event::Dismissed)))
            }
            KeyCode::Enter => {
                let value = picker.value()?;
                let name = picker.name.clone();
                self.popup = Popup::None;
                Some(Intent::Effects(
                    self.dispatch(Event::ArgumentChosen { name, value }),
                ))
            }
            KeyCode::Up => {
                picker.selected = picker.selected.saturating_sub(1);
                None
            }
            KeyCode::Down => {
                if picker.selected + 1 < picker.options.len() {
                    picker.selected += 1;
                }
                None
            }
            KeyCode::Backspace => {
                picker.input.pop();
                None
            }
            KeyCode::Char(c) if !c.is_control() => {
                picker.input.push(c);
                None
            }
            _ => None,
        }
    }

    fn on_main_key(&mut self, key: KeyEvent) -> Option<Intent> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Some(Intent::Effects(self.dispatch(Event::Cancel)));
        }
        match key.code {
            KeyCode::Char('q') => {
                let running = self.dispatcher.state().in_flight.len();
                if running == 0 {
                    return Some(Intent::Quit);
                }
                self.popup = Popup::ConfirmQuit { running };
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.move_selection(-1);
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.move_selection(1);
                None
            }
            KeyCode::Right | KeyCode::Char('l') | KeyCode::Tab => {
                self.switch_tab(1);
                None
            }
            KeyCode::Left | KeyCode::Char('h') | KeyCode::BackTab => {
                self.switch_tab(-1);
                None
            }
            KeyCode::Char(c @ '1'..='9') => {
                let index = (c as usize) - ('1' as usize);
                if index < self.tabs.len() {
                    self.tab = index;
                }
                None
            }
            KeyCode::PageUp => {
                self.scroll = (self.scroll + 10).min(self.log.len());
                None
            }
            KeyCode::PageDown => {
                self.scroll = self.scroll.saturating_sub(10);
                None
            }
            KeyCode::Enter => {
                let id = self.selected_action()?.id.clone();
                Some(Intent::Effects(self.dispatch(Event::Select(id))))
            }
            KeyCode::Char('c') => {
                self.clear_log();
                None
            }
            KeyCode::Char('x') => Some(Intent::Effects(self.dispatch(Event::Cancel))),
            KeyCode::Char('r') => Some(Intent::ClearCache),
            KeyCode::Char('p') => Some(Intent::PingRemotes),
            KeyCode::Char('y') => {
                if self.log.is_empty() {
                    self.status = "Nothing to copy".into();
                    return None;
                }
                Some(Intent::CopyLog(self.log_text()))
            }
            KeyCode::Char('m') => self.cycle_machine().map(Intent::MachineChanged),
            _ => None,
        }
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.actions().len();
        if len == 0 {
            return;
        }
        let current = self.selected_index() as isize;
        let next = (current + delta).clamp(0, len as isize - 1) as usize;
        if let Some(slot) = self.selected.get_mut(self.tab) {
            *slot = next;
        }
    }

    fn switch_tab(&mut self, delta: isize) {
        let len = self.tabs.len() as isize;
        if len == 0 {
            return;
        }
        self.tab = (self.tab as isize + delta).rem_euclid(len) as usize;
    }

    /// Advance to the next known machine, wrapping around.
    pub fn cycle_machine(&mut self) -> Option<String> {
        if self.machines.is_empty() {
            self.status = "No machines known".into();
            return None;
        }
        let next = match self
            .machine()
            .and_then(|m| self.machines.iter().position(|k| k == m))
        {
            Some(i) => (i + 1) % self.machines.len(),
            None => 0,
        };
        let machine = self.machines[next].clone();
        self.dispatcher.set_machine(Some(machine.clone()));
        self.status = format!("Machine: {machine}");
        Some(machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn app() -> App {
        let registry = Arc::new(Registry::with_builtins(&BTreeMap::new()).unwrap());
        App::new(
            registry,
            vec!["superheavy".into(), "backup".into()],
            Some("superheavy".into()),
            vec!["builder".into()],
        )
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn starts(intent: Option<Intent>) -> Vec<String> {
        match intent {
            Some(Intent::Effects(effects)) => effects
                .into_iter()
                .filter_map(|e| match e {
                    Effect::Start { action, .. } => Some(action),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn select(app: &mut App, id: &str) {
        app.tab = app
            .tabs
            .iter()
            .position(|c| app.registry.lookup(id).ok().map(|d| d.category) == Some(*c))
            .unwrap();
        let row = app.actions().iter().position(|d| d.id == id).unwrap();
        app.selected[app.tab] = row;
    }

    #[test]
    fn log_is_bounded() {
        let mut app = app();
        for i in 0..LOG_LIMIT + 50 {
            app.push_log(LogKind::Stdout, i.to_string());
        }
        assert_eq!(app.log.len(), LOG_LIMIT);
        assert_eq!(app.log.front().unwrap().text, "50");
    }

    #[test]
    fn tabs_wrap_and_jump() {
        let mut app = app();
        app.on_key(press(KeyCode::Left));
        assert_eq!(app.tab, app.tabs.len() - 1);
        app.on_key(press(KeyCode::Tab));
        assert_eq!(app.tab, 0);
        app.on_key(press(KeyCode::Char('3')));
        assert_eq!(app.tab, 2);
    }

    #[test]
    fn selection_stays_in_bounds() {
        let mut app = app();
        app.on_key(press(KeyCode::Up));
        assert_eq!(app.selected_index(), 0);
        for _ in 0..100 {
            app.on_key(press(KeyCode::Char('j')));
        }
        assert_eq!(app.selected_index(), app.actions().len() - 1);
    }

    #[test]
    fn enter_starts_machine_action() {
        let mut app = app();
        select(&mut app, "switch");
        let started = starts(app.on_key(press(KeyCode::Enter)));
        assert_eq!(started, vec!["switch"]);
        assert!(app.is_running());
        assert!(app.log.back().unwrap().text.starts_with('▶'));
    }

    #[test]
    fn dangerous_action_waits_for_yes() {
        let mut app = app();
        select(&mut app, "rollback");
        assert!(starts(app.on_key(press(KeyCode::Enter))).is_empty());
        assert!(matches!(app.popup, Popup::Confirm { .. }));

        // Unrelated keys leave the popup up.
        assert!(app.on_key(press(KeyCode::Char('j'))).is_none());
        assert_eq!(starts(app.on_key(press(KeyCode::Char('y')))), vec!["rollback"]);
        assert_eq!(app.popup, Popup::None);
    }

    #[test]
    fn declined_action_never_starts() {
        let mut app = app();
        select(&mut app, "rollback");
        app.on_key(press(KeyCode::Enter));
        assert!(starts(app.on_key(press(KeyCode::Char('n')))).is_empty());
        assert!(!app.is_running());
    }

    #[test]
    fn picker_takes_typed_or_listed_value() {
        let mut app = app();
        select(&mut app, "vm-start");
        app.on_key(press(KeyCode::Enter));
        assert!(matches!(&app.popup, Popup::Pick(p) if p.name == "vm"));

        app.set_pick_options("vm", vec!["test1".into(), "test2".into()]);
        app.on_key(press(KeyCode::Down));
        let effects = match app.on_key(press(KeyCode::Enter)) {
            Some(Intent::Effects(effects)) => effects,
            other => panic!("unexpected {other:?}"),
        };
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Start { args, .. } if args.get("vm").map(String::as_str) == Some("test2")
        )));
    }

    #[test]
    fn escape_dismisses_picker() {
        let mut app = app();
        select(&mut app, "vm-start");
        app.on_key(press(KeyCode::Enter));
        app.on_key(press(KeyCode::Esc));
        assert_eq!(app.popup, Popup::None);
        assert!(!app.is_running());
    }

    #[test]
    fn machine_cycles_and_wraps() {
        let mut app = app();
        assert_eq!(
            app.on_key(press(KeyCode::Char('m'))),
            Some(Intent::MachineChanged("backup".into()))
        );
        assert_eq!(app.cycle_machine().as_deref(), Some("superheavy"));
        assert_eq!(app.machine(), Some("superheavy"));
    }

    #[test]
    fn no_machine_blocks_machine_actions() {
        let registry = Arc::new(Registry::with_builtins(&BTreeMap::new()).unwrap());
        let mut app = App::new(registry, Vec::new(), None, Vec::new());
        select(&mut app, "switch");
        assert!(starts(app.on_key(press(KeyCode::Enter))).is_empty());
        assert_eq!(app.log.back().unwrap().kind, LogKind::Error);
    }

    #[test]
    fn quit_while_running_asks_first() {
        let mut app = app();
        select(&mut app, "switch");
        app.on_key(press(KeyCode::Enter));

        assert!(app.on_key(press(KeyCode::Char('q'))).is_none());
        assert_eq!(app.popup, Popup::ConfirmQuit { running: 1 });
        assert!(app.on_key(press(KeyCode::Esc)).is_none());
        assert_eq!(app.popup, Popup::None);

        app.on_key(press(KeyCode::Char('q')));
        assert_eq!(app.on_key(press(KeyCode::Char('y'))), Some(Intent::Quit));
    }

    #[test]
    fn quit_when_idle_is_immediate() {
        let mut app = app();
        assert_eq!(app.on_key(press(KeyCode::Char('q'))), Some(Intent::Quit));
    }

    #[test]
    fn output_is_tagged_with_its_action() {
        let mut app = app();
        select(&mut app, "switch");
        app.on_key(press(KeyCode::Enter));
        app.dispatch(Event::Spawned(1));
        select(&mut app, "sys-uptime");
        app.on_key(press(KeyCode::Enter));

        app.push_output(1, OutputLine { stream: Stream::Stdout, text: "building".into() });
        app.push_output(2, OutputLine { stream: Stream::Stderr, text: "up 3 days".into() });
        app.push_output(9, OutputLine { stream: Stream::Stdout, text: "stray".into() });

        let tagged: Vec<_> = app.log.iter().rev().take(3).map(|l| l.source.as_deref()).collect();
        assert_eq!(tagged, vec![None, Some("sys-uptime"), Some("switch")]);
        assert_eq!(app.log.back().unwrap().kind, LogKind::Stdout);
    }

    #[test]
    fn copy_takes_the_whole_log() {
        let mut app = app();
        assert!(app.on_key(press(KeyCode::Char('y'))).is_none());
        assert_eq!(app.status, "Nothing to copy");

        app.push_log(LogKind::Info, "first");
        select(&mut app, "sys-uptime");
        app.on_key(press(KeyCode::Enter));
        app.push_output(1, OutputLine { stream: Stream::Stdout, text: "up 3 days".into() });
        match app.on_key(press(KeyCode::Char('y'))) {
            Some(Intent::CopyLog(text)) => {
                assert!(text.starts_with("first\n"));
                assert!(text.ends_with("sys-uptime: up 3 days\n"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reachability_updates_known_remote() {
        let mut app = app();
        app.set_reachable("builder", true);
        app.set_reachable("nosuch", false);
        assert_eq!(app.remotes[0].reachable, Some(true));
    }
}
