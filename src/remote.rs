//! Remote targets reached over ssh.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::RemoteConfig;
use crate::error::ManageError;
use crate::registry::{ActionDefinition, Category, CommandStep};
use crate::util::{shell_join, shell_quote};

pub const CONNECT_TIMEOUT_S: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMachine {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub identity: Option<String>,
    pub flake_dir: Option<String>,
    pub enabled: bool,
    pub tty: bool,
}

impl From<&RemoteConfig> for RemoteMachine {
    fn from(c: &RemoteConfig) -> Self {
        Self {
            name: c.name.clone(),
            host: c.host.clone(),
            port: c.port,
            user: c.user.clone(),
            identity: c.identity.clone(),
            flake_dir: c.flake_dir.clone(),
            enabled: c.enabled,
            tty: c.tty,
        }
    }
}

impl RemoteMachine {
    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// The command line the remote shell will run for `step`.
    pub fn remote_command(&self, step: &ResolvedStep) -> String {
        let command = match step {
            ResolvedStep::Argv(argv) => shell_join(argv),
            ResolvedStep::Shell(pipeline) => format!("sh -c {}", shell_quote(pipeline)),
        };
        match &self.flake_dir {
            Some(dir) => format!("cd {} && {command}", shell_quote(dir)),
            None => command,
        }
    }

    /// Full local argv: `ssh [-tt] -p PORT [-i KEY] -o ... [user@]host -- '<command>'`.
    ///
    /// Without a remote tty, killing the local ssh leaves the remote command
    /// running; with one, the hangup reaches it.
    pub fn wrap(&self, step: &ResolvedStep) -> Vec<String> {
        let mut argv = vec!["ssh".to_string()];
        if self.tty {
            argv.push("-tt".into());
        }
        argv.extend(["-p".to_string(), self.port.to_string()]);
        if let Some(identity) = &self.identity {
            argv.push("-i".into());
            argv.push(identity.clone());
        }
        argv.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={CONNECT_TIMEOUT_S}"),
            self.destination(),
            "--".to_string(),
            self.remote_command(step),
        ]);
        argv
    }
}

/// A step after placeholder substitution, before any ssh wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedStep {
    Argv(Vec<String>),
    Shell(String),
}

// ── Remotes ──────────────────────────────────────────────

/// Configured remotes plus the last ping result for each.
#[derive(Debug, Default)]
pub struct Remotes {
    machines: Vec<RemoteMachine>,
    reachable: Mutex<HashMap<String, bool>>,
}

impl Remotes {
    pub fn from_config(configs: &[RemoteConfig]) -> Self {
        Self {
            machines: configs.iter().map(RemoteMachine::from).collect(),
            reachable: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Result<&RemoteMachine, ManageError> {
        self.machines
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| ManageError::UnknownRemote {
                name: name.to_string(),
            })
    }

    pub fn enabled(&self) -> impl Iterator<Item = &RemoteMachine> {
        self.machines.iter().filter(|m| m.enabled)
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// `None` until a ping has run for `name`.
    pub fn reachable(&self, name: &str) -> Option<bool> {
        self.lock().get(name).copied()
    }

    pub fn set_reachable(&self, name: &str, up: bool) {
        tracing::debug!(remote = name, up, "ping result");
        self.lock().insert(name.to_string(), up);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, bool>> {
        self.reachable.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Action run against a remote to check connectivity.
pub fn ping_action() -> ActionDefinition {
    let mut def = ActionDefinition::command(
        "ping",
        "Ping",
        Category::Network,
        vec![CommandStep::argv(&["true"])],
    );
    def.timeout = Duration::from_secs(CONNECT_TIMEOUT_S + 5);
    def
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn remote(name: &str) -> RemoteMachine {
        RemoteMachine {
            name: name.into(),
            host: "10.0.0.5".into(),
            port: 22,
            user: None,
            identity: None,
            flake_dir: None,
            enabled: true,
            tty: false,
        }
    }

    #[test]
    fn wrap_minimal() {
        let m = remote("superheavy");
        let argv = m.wrap(&ResolvedStep::Argv(vec!["uptime".into()]));
        assert_eq!(
            argv,
            vec![
                "ssh", "-p", "22", "-o", "BatchMode=yes", "-o", "ConnectTimeout=10",
                "10.0.0.5", "--", "uptime",
            ]
        );
    }

    #[test]
    fn tty_is_forced_by_default() {
        let cfg = RemoteConfig {
            name: "builder".into(),
            host: "builder.lan".into(),
            ..RemoteConfig::default()
        };
        let argv = RemoteMachine::from(&cfg).wrap(&ResolvedStep::Argv(vec!["sleep".into(), "600".into()]));
        assert_eq!(&argv[..4], &["ssh", "-tt", "-p", "22"]);
        assert_eq!(argv.last().unwrap(), "sleep 600");
    }

    #[test]
    fn wrap_with_user_identity_and_dir() {
        let mut m = remote("superheavy");
        m.port = 2222;
        m.user = Some("admin".into());
        m.identity = Some("/home/me/.ssh/id_ed25519".into());
        m.flake_dir = Some("/etc/nixos".into());

        let step = ResolvedStep::Argv(vec![
            "sudo".into(),
            "nixos-rebuild".into(),
            "switch".into(),
            "--flake".into(),
            ".#superheavy".into(),
        ]);
        let argv = m.wrap(&step);
        assert_eq!(&argv[..5], &["ssh", "-p", "2222", "-i", "/home/me/.ssh/id_ed25519"]);
        assert_eq!(argv[argv.len() - 3], "admin@10.0.0.5");
        assert_eq!(
            argv.last().unwrap(),
            "cd /etc/nixos && sudo nixos-rebuild switch --flake '.#superheavy'"
        );
    }

    #[test]
    fn hostile_arguments_stay_quoted() {
        let m = remote("x");
        let cmd = m.remote_command(&ResolvedStep::Argv(vec![
            "virsh".into(),
            "start".into(),
            "vm; rm -rf /".into(),
        ]));
        assert_eq!(cmd, "virsh start 'vm; rm -rf /'");
    }

    #[test]
    fn shell_steps_run_through_sh() {
        let m = remote("x");
        let cmd = m.remote_command(&ResolvedStep::Shell("df -h | head -5".into()));
        assert_eq!(cmd, "sh -c 'df -h | head -5'");
    }

    #[test]
    fn unknown_remote() {
        let remotes = Remotes::from_config(&[]);
        assert!(matches!(
            remotes.get("nope"),
            Err(ManageError::UnknownRemote { .. })
        ));
    }

    #[test]
    fn reachability_is_unknown_until_pinged() {
        let cfg = RemoteConfig {
            name: "backup".into(),
            host: "backup.lan".into(),
            ..RemoteConfig::default()
        };
        let remotes = Remotes::from_config(&[cfg]);
        assert_eq!(remotes.reachable("backup"), None);
        remotes.set_reachable("backup", false);
        assert_eq!(remotes.reachable("backup"), Some(false));
    }
}
