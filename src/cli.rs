use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "manage",
    version,
    about = "Administration console for a NixOS flake and the machines it declares"
)]
pub struct Cli {
    /// Path to config file (default: ./manage.toml, then ~/.config/manage/manage.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Run commands on a configured remote over ssh
    #[arg(long, global = true)]
    pub remote: Option<String>,

    /// Skip the confirmation for dangerous actions
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Override the action's timeout, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only show progress marks, no command output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Auto, global = true)]
    pub output: OutputFormat,

    /// Defaults to the terminal UI
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Spinners on a terminal, plain text otherwise
    Auto,
    Plain,
    Json,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct MachineArg {
    /// Target machine (default: this host)
    pub machine: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build and activate a machine's configuration
    Switch(MachineArg),

    /// Build a machine's configuration without activating it
    Build(MachineArg),

    /// Show what a rebuild would do
    DryRun(MachineArg),

    /// Build and make the configuration the boot default
    Boot(MachineArg),

    /// Build and activate without adding a boot entry
    Test(MachineArg),

    /// Build every machine in the flake, continuing past failures
    RebuildAll,

    /// Update all flake inputs
    Update,

    /// Update only the nixpkgs input
    UpdateNixpkgs,

    /// Collect garbage in the Nix store
    Gc,

    /// Show the state of a machine's system
    Status(MachineArg),

    /// Run the system health check
    Health,

    /// List the machines the flake declares
    ListMachines,

    /// List the flake's development shells
    DevShells,

    /// Create a libvirt VM (interactive when --name is omitted on a terminal)
    CreateVm(CreateVmArgs),

    /// Run any registered action by id
    Run {
        /// Action id (see `manage actions`)
        id: String,

        /// Target machine for actions that need one (default: this host)
        #[arg(short, long)]
        machine: Option<String>,

        /// Placeholder value, e.g. `--arg vm=test1`
        #[arg(short, long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        args: Vec<(String, String)>,
    },

    /// List registered actions
    Actions {
        /// Only this category (nixos, docker, system, git, network, services, storage, vm, dev)
        #[arg(long)]
        category: Option<String>,
    },

    /// Start the terminal UI
    Tui(MachineArg),
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct CreateVmArgs {
    /// VM name
    #[arg(long)]
    pub name: Option<String>,

    /// OS variant passed to virt-install
    #[arg(long)]
    pub os: Option<String>,

    /// Memory, e.g. 2G or 512M
    #[arg(long)]
    pub memory: Option<String>,

    /// Number of virtual CPUs
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Disk size, e.g. 20G
    #[arg(long)]
    pub disk: Option<String>,

    /// libvirt network
    #[arg(long)]
    pub network: Option<String>,

    /// Install from this ISO instead of importing the disk
    #[arg(long)]
    pub iso: Option<PathBuf>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_tui() {
        let cli = Cli::try_parse_from(["manage"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.output, OutputFormat::Auto);
    }

    #[test]
    fn run_collects_arguments() {
        let cli = Cli::try_parse_from([
            "manage", "run", "vm-start", "--arg", "vm=test1", "--arg", "x=a=b", "--yes",
        ])
        .unwrap();
        assert!(cli.yes);
        match cli.command {
            Some(Command::Run { id, args, machine }) => {
                assert_eq!(id, "vm-start");
                assert_eq!(machine, None);
                assert_eq!(
                    args,
                    vec![
                        ("vm".to_string(), "test1".to_string()),
                        ("x".to_string(), "a=b".to_string())
                    ]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_key_value_is_rejected() {
        assert!(Cli::try_parse_from(["manage", "run", "x", "--arg", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["manage", "run", "x", "--arg", "=v"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["manage", "switch", "superheavy", "--remote", "builder", "--timeout", "60"])
            .unwrap();
        assert_eq!(cli.remote.as_deref(), Some("builder"));
        assert_eq!(cli.timeout, Some(60));
        assert!(matches!(cli.command, Some(Command::Switch(MachineArg { machine: Some(ref m) })) if m == "superheavy"));
    }
}
