use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Controls how step output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinners with a short ring of recent output, cleared when the step ends.
    Normal,
    /// Like Normal but the output stays on screen after the step ends.
    Verbose,
    /// Spinners only.
    Quiet,
    /// No ANSI, plain println output (piped / non-TTY).
    Plain,
}

/// Numbered steps with spinners and check / cross marks.
pub struct StepProgress {
    multi: MultiProgress,
    total_steps: usize,
    current_step: usize,
    mode: OutputMode,
}

struct StepState {
    log_lines: VecDeque<String>,
    done_label: Option<String>,
}

/// Handle passed into a step for logging while it runs.
///
/// Output lines are appended to the spinner's message as extra lines rather
/// than separate bars, so indicatif's line accounting stays correct.
pub struct Step {
    bar: ProgressBar,
    state: Arc<Mutex<StepState>>,
    label: String,
    mode: OutputMode,
}

fn template(t: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(t)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn spinner_style() -> ProgressStyle {
    template("[{prefix}] {spinner:.cyan} {msg}")
}

fn done_style() -> ProgressStyle {
    template("[{prefix}] \u{2713} {msg:.green}")
}

fn failed_style() -> ProgressStyle {
    template("[{prefix}] \u{2717} {msg:.red}")
}

const MAX_LOG_LINES: usize = 10;

fn lock(state: &Mutex<StepState>) -> MutexGuard<'_, StepState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl StepProgress {
    pub fn new(total_steps: usize, mode: OutputMode) -> Self {
        let multi = if mode == OutputMode::Plain {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self {
            multi,
            total_steps,
            current_step: 0,
            mode,
        }
    }

    /// Run a fallible step: spinner while running, ✓ on `Ok`, ✗ on `Err`.
    pub async fn run<F, Fut, T, E>(&mut self, label: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(Step) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.current_step += 1;
        let prefix = format!("{}/{}", self.current_step, self.total_steps);

        if self.mode == OutputMode::Plain {
            println!("[{prefix}] {label}");
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(prefix.clone());
        bar.set_message(label.to_string());
        bar.enable_steady_tick(std::time::Duration::from_millis(80));

        let state = Arc::new(Mutex::new(StepState {
            log_lines: VecDeque::new(),
            done_label: None,
        }));

        let step = Step {
            bar: bar.clone(),
            state: state.clone(),
            label: label.to_string(),
            mode: self.mode,
        };

        let result = f(step).await;

        let st = lock(&state);
        if self.mode == OutputMode::Verbose || (result.is_err() && self.mode == OutputMode::Normal) {
            for line in &st.log_lines {
                self.multi.println(format!("        {line}")).ok();
            }
        }
        let done_label = st.done_label.clone().unwrap_or_else(|| label.to_string());
        drop(st);

        let (mark, style) = match result {
            Ok(_) => ('\u{2713}', done_style()),
            Err(_) => ('\u{2717}', failed_style()),
        };
        if self.mode == OutputMode::Plain {
            println!("[{prefix}] {mark} {done_label}");
        }
        bar.set_style(style);
        bar.finish_with_message(done_label);

        result
    }

    /// Print a plain line above the managed area.
    pub fn println(&self, text: &str) {
        if self.mode == OutputMode::Plain {
            println!("{text}");
        } else {
            self.multi.println(text).ok();
        }
    }
}

impl Step {
    /// Add an output line under this step (ring of the last few lines).
    pub fn log(&self, line: &str) {
        match self.mode {
            OutputMode::Quiet => return,
            OutputMode::Plain => {
                for sub in line.split('\n') {
                    println!("        {sub}");
                }
                return;
            }
            OutputMode::Normal | OutputMode::Verbose => {}
        }

        let mut state = lock(&self.state);
        for sub in line.split('\n') {
            if state.log_lines.len() >= MAX_LOG_LINES {
                state.log_lines.pop_front();
            }
            state.log_lines.push_back(sub.to_string());
        }

        let mut msg = self.label.clone();
        for log_line in &state.log_lines {
            msg.push_str("\n        ");
            msg.push_str(log_line);
        }
        self.bar.set_message(msg);
    }

    /// Override the label shown with the final mark.
    pub fn set_done_label(&self, label: impl Into<String>) {
        lock(&self.state).done_label = Some(label.into());
    }
}
