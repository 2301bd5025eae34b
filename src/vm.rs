//! Creating libvirt VMs: validation, disk image, `virt-install`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use inquire::validator::Validation;
use inquire::{CustomType, Select, Text};

use crate::cache::keys;
use crate::config::VmConfig;
use crate::context::Context;
use crate::error::ManageError;
use crate::exec::{Args, ExecOptions, ExecutionResult, OutputLine, Stream, Target};
use crate::ops;
use crate::registry::{ActionDefinition, Category, CommandStep};
use crate::util::{parse_size, validate_name};

const MIB: u64 = 1024 * 1024;
const MIN_MEMORY_MIB: u64 = 256;

pub const DEFAULT_MEMORY: &str = "2G";
pub const DEFAULT_CPUS: u32 = 2;
pub const DEFAULT_DISK: &str = "20G";

/// OS variants offered by the wizard (`virt-install --os-variant`).
const OS_VARIANTS: &[&str] = &["generic", "nixos-unstable", "debian12", "ubuntu24.04", "fedora40", "archlinux"];

/// A validated VM request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpec {
    pub name: String,
    pub os: String,
    pub memory_mib: u64,
    pub cpus: u32,
    pub disk_bytes: u64,
    pub network: String,
    pub iso: Option<PathBuf>,
}

/// Raw, unvalidated inputs (CLI flags, wizard answers or action args).
#[derive(Debug, Clone, Default)]
pub struct VmRequest {
    pub name: String,
    pub os: Option<String>,
    pub memory: Option<String>,
    pub cpus: Option<u32>,
    pub disk: Option<String>,
    pub network: Option<String>,
    pub iso: Option<PathBuf>,
}

impl VmRequest {
    pub fn from_args(args: &Args) -> Result<Self, ManageError> {
        let cpus = match args.get("cpus") {
            Some(c) => Some(c.parse::<u32>().map_err(|_| ManageError::Validation {
                message: format!("cpus must be a positive integer (got '{c}')"),
            })?),
            None => None,
        };
        Ok(Self {
            name: args.get("name").cloned().unwrap_or_default(),
            os: args.get("os").cloned(),
            memory: args.get("memory").cloned(),
            cpus,
            disk: args.get("disk").cloned(),
            network: args.get("network").cloned(),
            iso: args.get("iso").map(PathBuf::from),
        })
    }

    pub fn to_args(&self) -> Args {
        let mut args = Args::new();
        args.insert("name".into(), self.name.clone());
        let optional = [
            ("os", self.os.clone()),
            ("memory", self.memory.clone()),
            ("cpus", self.cpus.map(|c| c.to_string())),
            ("disk", self.disk.clone()),
            ("network", self.network.clone()),
            ("iso", self.iso.as_ref().map(|p| p.display().to_string())),
        ];
        for (k, v) in optional {
            if let Some(v) = v {
                args.insert(k.into(), v);
            }
        }
        args
    }

    /// Validate and fill in defaults from `[vm]`.
    pub fn validate(&self, defaults: &VmConfig) -> Result<VmSpec, ManageError> {
        validate_name("vm", &self.name)?;

        let memory = self.memory.as_deref().unwrap_or(DEFAULT_MEMORY);
        let memory_mib = parse_size(memory)? / MIB;
        if memory_mib < MIN_MEMORY_MIB {
            return Err(ManageError::Validation {
                message: format!("memory must be at least {MIN_MEMORY_MIB}M (got '{memory}')"),
            });
        }

        let cpus = self.cpus.unwrap_or(DEFAULT_CPUS);
        if cpus < 1 {
            return Err(ManageError::Validation {
                message: "cpus must be at least 1".into(),
            });
        }

        let disk = self.disk.as_deref().unwrap_or(DEFAULT_DISK);
        let disk_bytes = parse_size(disk)?;
        if disk_bytes < MIB {
            return Err(ManageError::Validation {
                message: format!("disk must be at least 1M (got '{disk}')"),
            });
        }

        if let Some(iso) = &self.iso
            && !iso.is_file()
        {
            return Err(ManageError::Validation {
                message: format!("ISO not found: {}", iso.display()),
            });
        }

        Ok(VmSpec {
            name: self.name.clone(),
            os: self.os.clone().unwrap_or_else(|| defaults.default_os.clone()),
            memory_mib,
            cpus,
            disk_bytes,
            network: self
                .network
                .clone()
                .unwrap_or_else(|| defaults.default_network.clone()),
            iso: self.iso.clone(),
        })
    }
}

impl VmSpec {
    pub fn disk_path(&self, image_dir: &Path) -> PathBuf {
        image_dir.join(format!("{}.qcow2", self.name))
    }

    fn disk_action(&self) -> ActionDefinition {
        let mut def = ActionDefinition::command(
            "vm-disk",
            "Create disk image",
            Category::Vm,
            vec![CommandStep::argv(&[
                "qemu-img", "create", "-f", "qcow2", "{disk_path}", "{disk_bytes}",
            ])],
        );
        def.timeout = Duration::from_secs(120);
        def
    }

    fn define_action(&self) -> ActionDefinition {
        let mut argv = vec![
            "virt-install", "--connect", "{uri}", "--name", "{name}", "--memory", "{memory}",
            "--vcpus", "{cpus}", "--disk", "path={disk_path},format=qcow2", "--os-variant", "{os}",
            "--network", "network={network}", "--graphics", "none",
        ];
        if self.iso.is_some() {
            argv.extend(["--cdrom", "{iso}"]);
        } else {
            argv.push("--import");
        }
        argv.push("--noautoconsole");

        let mut def = ActionDefinition::command("vm-define", "Define VM", Category::Vm, vec![CommandStep::argv(&argv)]);
        def.timeout = Duration::from_secs(600);
        def
    }

    fn step_args(&self, settings: &crate::config::Settings) -> Args {
        let mut args = Args::new();
        args.insert("name".into(), self.name.clone());
        args.insert("uri".into(), settings.config.vm.libvirt_uri.clone());
        args.insert("memory".into(), self.memory_mib.to_string());
        args.insert("cpus".into(), self.cpus.to_string());
        args.insert("disk_path".into(), self.disk_path(&settings.image_dir()).display().to_string());
        args.insert("disk_bytes".into(), self.disk_bytes.to_string());
        args.insert("os".into(), self.os.clone());
        args.insert("network".into(), self.network.clone());
        if let Some(iso) = &self.iso {
            args.insert("iso".into(), iso.display().to_string());
        }
        args
    }
}

// ── Steps ────────────────────────────────────────────────

/// Fail with `VmExists` if libvirt already knows the name or its disk
/// exists. The domain list is re-read, never taken from the cache.
pub async fn ensure_absent(ctx: &Context, spec: &VmSpec) -> Result<(), ManageError> {
    let existing = ops::vm_list_fresh(ctx).await?;
    if existing.iter().any(|vm| vm == &spec.name) {
        return Err(ManageError::VmExists {
            name: spec.name.clone(),
        });
    }
    let disk = spec.disk_path(&ctx.settings.image_dir());
    if disk.exists() {
        return Err(ManageError::Validation {
            message: format!("disk image already exists: {}", disk.display()),
        });
    }
    Ok(())
}

pub async fn create_disk(
    ctx: &Context,
    spec: &VmSpec,
    on_line: &mut (dyn FnMut(OutputLine) + Send),
    options: &ExecOptions,
) -> Result<ExecutionResult, ManageError> {
    let def = spec.disk_action();
    let args = spec.step_args(&ctx.settings);
    ctx.executor
        .execute(&def, &args, &Target::Local, on_line, options)
        .await?
        .into_outcome()
}

pub async fn define(
    ctx: &Context,
    spec: &VmSpec,
    on_line: &mut (dyn FnMut(OutputLine) + Send),
    options: &ExecOptions,
) -> Result<ExecutionResult, ManageError> {
    let def = spec.define_action();
    let args = spec.step_args(&ctx.settings);
    let outcome = ctx
        .executor
        .execute(&def, &args, &Target::Local, on_line, options)
        .await
        .and_then(ExecutionResult::into_outcome);
    ctx.cache.invalidate(keys::VM_LIST);

    if outcome.is_err() {
        let disk = spec.disk_path(&ctx.settings.image_dir());
        match std::fs::remove_file(&disk) {
            Ok(()) => tracing::info!(disk = %disk.display(), "removed disk of failed VM"),
            Err(e) => tracing::warn!(disk = %disk.display(), error = %e, "could not remove disk of failed VM"),
        }
    }
    outcome
}

/// Whole create-vm flow, reporting progress as output lines.
pub async fn create_vm(
    ctx: &Context,
    spec: &VmSpec,
    on_line: &mut (dyn FnMut(OutputLine) + Send),
    options: &ExecOptions,
) -> Result<ExecutionResult, ManageError> {
    note(on_line, format!("Checking that '{}' does not exist...", spec.name));
    ensure_absent(ctx, spec).await?;

    note(
        on_line,
        format!(
            "Creating {} ({} bytes)...",
            spec.disk_path(&ctx.settings.image_dir()).display(),
            spec.disk_bytes
        ),
    );
    let disk = create_disk(ctx, spec, on_line, options).await?;

    note(on_line, format!("Defining VM '{}'...", spec.name));
    let defined = define(ctx, spec, on_line, options).await?;

    note(on_line, format!("✓ VM '{}' created", spec.name));
    Ok(ExecutionResult {
        command: format!("{} && {}", disk.command, defined.command),
        duration_ms: disk.duration_ms + defined.duration_ms,
        ..defined
    })
}

fn note(on_line: &mut (dyn FnMut(OutputLine) + Send), text: String) {
    on_line(OutputLine {
        stream: Stream::Stdout,
        text,
    });
}

// ── Wizard ───────────────────────────────────────────────

pub(crate) fn map_inquire_err(e: inquire::InquireError) -> ManageError {
    match e {
        inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => {
            ManageError::PromptCancelled
        }
        other => ManageError::Validation {
            message: format!("prompt error: {other}"),
        },
    }
}

fn size_validator(min_mib: u64) -> impl Fn(&str) -> Result<Validation, inquire::CustomUserError> + Clone {
    move |input: &str| match parse_size(input) {
        Ok(bytes) if bytes / MIB >= min_mib => Ok(Validation::Valid),
        Ok(_) => Ok(Validation::Invalid(format!("Must be at least {min_mib}M").into())),
        Err(e) => Ok(Validation::Invalid(format!("{e}").into())),
    }
}

/// Ask for every VM field interactively. `existing` names are rejected up front.
pub fn wizard(defaults: &VmConfig, existing: &[String]) -> Result<VmRequest, ManageError> {
    let taken: Vec<String> = existing.to_vec();
    let name = Text::new("VM name:")
        .with_help_message("letters, digits, '-' and '_'")
        .with_validator(move |input: &str| {
            if let Err(e) = validate_name("vm", input) {
                return Ok(Validation::Invalid(e.to_string().into()));
            }
            if taken.iter().any(|t| t == input) {
                return Ok(Validation::Invalid(format!("a VM named '{input}' already exists").into()));
            }
            Ok(Validation::Valid)
        })
        .prompt()
        .map_err(map_inquire_err)?;

    let mut variants: Vec<String> = OS_VARIANTS.iter().map(|s| s.to_string()).collect();
    if let Some(pos) = variants.iter().position(|v| *v == defaults.default_os) {
        variants.swap(0, pos);
    } else {
        variants.insert(0, defaults.default_os.clone());
    }
    let os = Select::new("OS variant:", variants)
        .prompt()
        .map_err(map_inquire_err)?;

    let memory = Text::new("Memory:")
        .with_default(DEFAULT_MEMORY)
        .with_help_message("e.g. '2G', '512M', '4096M'")
        .with_validator(size_validator(MIN_MEMORY_MIB))
        .prompt()
        .map_err(map_inquire_err)?;

    let cpus: u32 = CustomType::new("CPUs:")
        .with_default(DEFAULT_CPUS)
        .with_error_message("Please enter a valid number")
        .with_validator(|val: &u32| {
            if *val >= 1 {
                Ok(Validation::Valid)
            } else {
                Ok(Validation::Invalid("Must be at least 1".into()))
            }
        })
        .prompt()
        .map_err(map_inquire_err)?;

    let disk = Text::new("Disk size:")
        .with_default(DEFAULT_DISK)
        .with_validator(size_validator(1))
        .prompt()
        .map_err(map_inquire_err)?;

    let network = Text::new("Network:")
        .with_default(&defaults.default_network)
        .prompt()
        .map_err(map_inquire_err)?;

    let iso = Text::new("Install ISO (empty to import the disk as-is):")
        .with_validator(|input: &str| {
            if input.is_empty() || Path::new(input).is_file() {
                Ok(Validation::Valid)
            } else {
                Ok(Validation::Invalid("file not found".into()))
            }
        })
        .prompt()
        .map_err(map_inquire_err)?;

    Ok(VmRequest {
        name,
        os: Some(os),
        memory: Some(memory),
        cpus: Some(cpus),
        disk: Some(disk),
        network: Some(network),
        iso: (!iso.is_empty()).then(|| PathBuf::from(iso)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_settings;
    use crate::exec::Executor;
    use std::os::unix::fs::PermissionsExt;

    /// Context whose libvirt queries go to `virsh`.
    fn context_with_virsh(dir: &Path, virsh: &str) -> Context {
        let mut settings = test_settings(dir);
        settings.config.vm.virsh = virsh.into();
        Context::with_executor(settings, Executor::new(dir)).unwrap()
    }

    /// A stand-in `virsh` that lists `domains`.
    fn fake_virsh(dir: &Path, domains: &[&str]) -> String {
        let path = dir.join("fake-virsh");
        let mut script = String::from("#!/bin/sh\n");
        for domain in domains {
            script.push_str(&format!("echo {domain}\n"));
        }
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn request(name: &str) -> VmRequest {
        VmRequest {
            name: name.into(),
            ..VmRequest::default()
        }
    }

    #[test]
    fn defaults_are_filled_in() {
        let spec = request("test1").validate(&VmConfig::default()).unwrap();
        assert_eq!(spec.memory_mib, 2048);
        assert_eq!(spec.cpus, 2);
        assert_eq!(spec.disk_bytes, 20 * 1024 * MIB);
        assert_eq!(spec.os, "generic");
        assert_eq!(spec.network, "default");
        assert!(spec.iso.is_none());
    }

    #[test]
    fn bad_names_rejected() {
        for name in ["", "has space", "x/y", "a".repeat(65).as_str()] {
            assert!(request(name).validate(&VmConfig::default()).is_err(), "{name:?}");
        }
    }

    #[test]
    fn bad_sizes_rejected() {
        let mut r = request("test1");
        r.memory = Some("lots".into());
        assert!(r.validate(&VmConfig::default()).is_err());

        let mut r = request("test1");
        r.memory = Some("128M".into());
        assert!(r.validate(&VmConfig::default()).is_err());

        let mut r = request("test1");
        r.disk = Some("0G".into());
        assert!(r.validate(&VmConfig::default()).is_err());

        let mut r = request("test1");
        r.cpus = Some(0);
        assert!(r.validate(&VmConfig::default()).is_err());
    }

    #[test]
    fn missing_iso_rejected() {
        let mut r = request("test1");
        r.iso = Some(PathBuf::from("/nonexistent/install.iso"));
        assert!(r.validate(&VmConfig::default()).is_err());
    }

    #[test]
    fn args_round_trip_through_request() {
        let mut r = request("web");
        r.cpus = Some(4);
        r.memory = Some("8G".into());
        let back = VmRequest::from_args(&r.to_args()).unwrap();
        assert_eq!(back.name, "web");
        assert_eq!(back.cpus, Some(4));
        assert_eq!(back.memory.as_deref(), Some("8G"));
        assert!(back.disk.is_none());
    }

    #[test]
    fn define_uses_import_or_cdrom() {
        let spec = request("web").validate(&VmConfig::default()).unwrap();
        let argv = match &spec.define_action().steps()[0] {
            CommandStep::Argv(a) => a.clone(),
            _ => unreachable!(),
        };
        assert!(argv.contains(&"--import".to_string()));
        assert!(argv.contains(&"--noautoconsole".to_string()));
        assert!(!argv.contains(&"--cdrom".to_string()));
    }

    #[tokio::test]
    async fn existing_name_rejected_before_disk_creation() {
        let dir = tempfile::tempdir().unwrap();
        let virsh = fake_virsh(dir.path(), &["test1", "web"]);
        let ctx = context_with_virsh(dir.path(), &virsh);

        let spec = request("test1").validate(&ctx.settings.config.vm).unwrap();
        let err = create_vm(&ctx, &spec, &mut |_| {}, &ExecOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ManageError::VmExists { ref name } if name == "test1"));
        // Only the domain listing ran.
        assert_eq!(ctx.executor.spawned(), 1);
        assert!(!spec.disk_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn stale_domain_list_is_not_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let virsh = fake_virsh(dir.path(), &["test1"]);
        let ctx = context_with_virsh(dir.path(), &virsh);
        ctx.cache.set(keys::VM_LIST, vec!["other".into()], Duration::from_secs(30));

        let spec = request("test1").validate(&ctx.settings.config.vm).unwrap();
        let err = ensure_absent(&ctx, &spec).await.unwrap_err();
        assert!(matches!(err, ManageError::VmExists { .. }));
        assert_eq!(ctx.cache.get(keys::VM_LIST), Some(vec!["test1".to_string()]));
    }

    #[tokio::test]
    async fn leftover_disk_blocks_creation() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_virsh(dir.path(), "true");
        std::fs::write(dir.path().join("web.qcow2"), b"").unwrap();

        let spec = request("web").validate(&ctx.settings.config.vm).unwrap();
        let err = ensure_absent(&ctx, &spec).await.unwrap_err();
        assert!(err.to_string().contains("disk image already exists"));
        assert_eq!(ctx.executor.spawned(), 1);
    }
}
