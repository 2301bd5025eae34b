use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ManageError {
    #[error("unknown action '{id}'")]
    #[diagnostic(help("run `manage actions` to list available actions"))]
    UnknownAction { id: String },

    #[error("action '{id}' is already registered")]
    DuplicateActionId { id: String },

    #[error("unknown machine '{name}' (known: {known})")]
    #[diagnostic(help("add it to `machines` in manage.toml or pass a configured machine name"))]
    UnknownMachine { name: String, known: String },

    #[error("unknown remote '{name}'")]
    #[diagnostic(help("remotes are declared as [[remote]] entries in manage.toml"))]
    UnknownRemote { name: String },

    #[error("action '{action}' is missing argument '{name}'")]
    MissingArgument { action: String, name: String },

    #[error("failed to start `{command}`")]
    #[diagnostic(help("make sure the command is installed and available in PATH"))]
    SpawnFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command failed with exit code {code}: `{command}`")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr_tail: String,
    },

    #[error("`{command}` timed out after {seconds}s")]
    #[diagnostic(help("the action may have been partially applied"))]
    Timeout { command: String, seconds: u64 },

    #[error("`{command}` was cancelled")]
    Cancelled { command: String },

    #[error("'{running}' is still running; wait for it to finish before starting '{requested}'")]
    Busy { running: String, requested: String },

    #[error("{count} machine(s) failed to build: {failed}")]
    #[diagnostic(help("run `manage build <machine>` to see the full output"))]
    RebuildFailed { count: usize, failed: String },

    #[error("a VM named '{name}' already exists")]
    VmExists { name: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("terminal error: {message}")]
    Terminal { message: String },

    #[error("cancelled by user")]
    PromptCancelled,
}

impl ManageError {
    /// Exit code the CLI should terminate with for this error.
    ///
    /// A failed external command propagates its own exit code; everything
    /// else maps to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            ManageError::NonZeroExit { code, .. } if *code > 0 && *code < 256 => *code,
            _ => 1,
        }
    }
}
