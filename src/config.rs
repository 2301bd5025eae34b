use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use facet::Facet;

use crate::error::ManageError;
use crate::paths;
use crate::util::validate_name;

pub const CONFIG_FILE: &str = "manage.toml";

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default = "/etc/nixos")]
    pub flake: String,
    #[facet(default = "x86_64-linux")]
    pub system: String,
    /// Known machine names. Empty means "ask the flake".
    #[facet(default)]
    pub machines: Vec<String>,
    #[facet(default)]
    pub cache: CacheConfig,
    #[facet(default)]
    pub vm: VmConfig,
    #[facet(default)]
    pub remote: Vec<RemoteConfig>,
    #[facet(default)]
    pub actions: BTreeMap<String, ActionOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flake: "/etc/nixos".into(),
            system: "x86_64-linux".into(),
            machines: Vec::new(),
            cache: CacheConfig::default(),
            vm: VmConfig::default(),
            remote: Vec::new(),
            actions: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct CacheConfig {
    #[facet(default = 256)]
    pub max_entries: usize,
    #[facet(default = 60)]
    pub machine_list_ttl_s: u64,
    #[facet(default = 300)]
    pub dev_shell_ttl_s: u64,
    #[facet(default = 30)]
    pub vm_list_ttl_s: u64,
    #[facet(default = 15)]
    pub container_list_ttl_s: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            machine_list_ttl_s: 60,
            dev_shell_ttl_s: 300,
            vm_list_ttl_s: 30,
            container_list_ttl_s: 15,
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct VmConfig {
    #[facet(default = "/var/lib/libvirt/images")]
    pub image_dir: String,
    #[facet(default = "qemu:///system")]
    pub libvirt_uri: String,
    /// Program used to query libvirt.
    #[facet(default = "virsh")]
    pub virsh: String,
    #[facet(default = "generic")]
    pub default_os: String,
    #[facet(default = "default")]
    pub default_network: String,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            image_dir: "/var/lib/libvirt/images".into(),
            libvirt_uri: "qemu:///system".into(),
            virsh: "virsh".into(),
            default_os: "generic".into(),
            default_network: "default".into(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct RemoteConfig {
    pub name: String,
    pub host: String,
    #[facet(default = 22)]
    pub port: u16,
    pub user: Option<String>,
    /// Private key passed to `ssh -i`.
    pub identity: Option<String>,
    /// Remote working directory; commands are prefixed with `cd <dir> &&`.
    pub flake_dir: Option<String>,
    #[facet(default = true)]
    pub enabled: bool,
    /// Force a remote tty (`ssh -tt`) so cancelling a run hangs up the
    /// remote command too. Stderr then arrives merged into stdout.
    #[facet(default = true)]
    pub tty: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: String::new(),
            port: 22,
            user: None,
            identity: None,
            flake_dir: None,
            enabled: true,
            tty: true,
        }
    }
}

/// Per-action tweaks from `[actions.<id>]`.
#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct ActionOverride {
    pub dangerous: Option<bool>,
    pub timeout_s: Option<u64>,
    /// `0` disables caching for the action.
    pub ttl_s: Option<u64>,
    pub parallel_safe: Option<bool>,
    /// Resource lock name; `""` removes the built-in one.
    pub lock: Option<String>,
}

// ── Settings ──────────────────────────────────────────────

/// Parsed configuration plus where it came from.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// `None` when running on built-in defaults.
    pub path: Option<PathBuf>,
    pub config: Config,
}

impl Settings {
    pub fn flake_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.flake)
    }

    pub fn image_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.vm.image_dir)
    }
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &Config) -> Result<(), ManageError> {
    if config.flake.is_empty() {
        return Err(ManageError::Validation {
            message: "flake must not be empty".into(),
        });
    }

    for machine in &config.machines {
        validate_name("machine", machine)?;
    }

    let mut seen = HashSet::new();
    for remote in &config.remote {
        validate_name("remote", &remote.name)?;
        if remote.host.is_empty() {
            return Err(ManageError::Validation {
                message: format!("remote '{}': host is required", remote.name),
            });
        }
        if remote.port == 0 {
            return Err(ManageError::Validation {
                message: format!("remote '{}': port must be non-zero", remote.name),
            });
        }
        if !seen.insert(remote.name.as_str()) {
            return Err(ManageError::Validation {
                message: format!("duplicate remote '{}'", remote.name),
            });
        }
    }

    if config.vm.image_dir.is_empty() {
        return Err(ManageError::Validation {
            message: "vm.image_dir must not be empty".into(),
        });
    }

    Ok(())
}

// ── public API ────────────────────────────────────────────

pub fn load_config(path: &Path) -> Result<Config, ManageError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ManageError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    let config: Config = facet_toml::from_str(&contents).map_err(|e| ManageError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Resolve the config to use: the explicit path (which must exist), else
/// `./manage.toml`, else the per-user config file, else built-in defaults.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings, ManageError> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => candidate_paths().into_iter().find(|p| p.is_file()),
    };

    match path {
        Some(path) => {
            let config = load_config(&path)?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(Settings {
                path: Some(path),
                config,
            })
        }
        None => {
            tracing::debug!("no config file found, using defaults");
            Ok(Settings::default())
        }
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut out = vec![PathBuf::from(CONFIG_FILE)];
    if let Some(user) = paths::user_config_file() {
        out.push(user);
    }
    out
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Settings pointing at a scratch image dir, for tests elsewhere.
    pub fn test_settings(image_dir: &Path) -> Settings {
        let mut config = Config::default();
        config.machines = vec!["superheavy".into(), "backup".into()];
        config.vm.image_dir = image_dir.display().to_string();
        Settings { path: None, config }
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = facet_toml::from_str("").unwrap();
        assert_eq!(config.flake, "/etc/nixos");
        assert_eq!(config.system, "x86_64-linux");
        assert!(config.machines.is_empty());
        assert_eq!(config.cache.machine_list_ttl_s, 60);
        assert_eq!(config.cache.dev_shell_ttl_s, 300);
        assert_eq!(config.cache.vm_list_ttl_s, 30);
        assert_eq!(config.vm.libvirt_uri, "qemu:///system");
        validate_config(&config).unwrap();
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
flake = "/home/brian/nixos"
machines = ["brian-laptop", "superheavy", "docker", "backup"]

[cache]
vm_list_ttl_s = 10

[vm]
image_dir = "/srv/images"

[[remote]]
name = "superheavy"
host = "10.0.0.5"
user = "admin"
flake_dir = "/etc/nixos"

[[remote]]
name = "backup"
host = "backup.lan"
port = 2222
enabled = false

[actions.gc]
dangerous = true
timeout_s = 900
"#;
        let config: Config = facet_toml::from_str(toml).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.flake, "/home/brian/nixos");
        assert_eq!(config.machines.len(), 4);
        assert_eq!(config.cache.vm_list_ttl_s, 10);
        assert_eq!(config.cache.machine_list_ttl_s, 60);
        assert_eq!(config.vm.image_dir, "/srv/images");
        assert_eq!(config.vm.default_network, "default");

        assert_eq!(config.remote.len(), 2);
        assert_eq!(config.remote[0].port, 22);
        assert!(config.remote[0].enabled);
        assert_eq!(config.remote[0].user.as_deref(), Some("admin"));
        assert_eq!(config.remote[1].port, 2222);
        assert!(!config.remote[1].enabled);

        let gc = &config.actions["gc"];
        assert_eq!(gc.dangerous, Some(true));
        assert_eq!(gc.timeout_s, Some(900));
        assert_eq!(gc.ttl_s, None);
    }

    #[test]
    fn duplicate_remote_rejected() {
        let toml = r#"
[[remote]]
name = "a"
host = "h1"

[[remote]]
name = "a"
host = "h2"
"#;
        let config: Config = facet_toml::from_str(toml).unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate remote"));
    }

    #[test]
    fn zero_port_rejected() {
        let toml = r#"
[[remote]]
name = "a"
host = "h1"
port = 0
"#;
        let config: Config = facet_toml::from_str(toml).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn invalid_machine_name_rejected() {
        let mut config = Config::default();
        config.machines = vec!["bad name".into()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_settings(Some(&missing)).unwrap_err();
        assert!(matches!(err, ManageError::ConfigLoad { .. }));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manage.toml");
        std::fs::write(&path, "flake = \"/tmp/flake\"\n").unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.path.as_deref(), Some(path.as_path()));
        assert_eq!(settings.flake_dir(), PathBuf::from("/tmp/flake"));
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manage.toml");
        std::fs::write(&path, "machines = 42\n").unwrap();
        let err = load_settings(Some(&path)).unwrap_err();
        assert!(matches!(err, ManageError::ConfigParse { .. }));
    }
}
