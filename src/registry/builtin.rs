//! Built-in action table.

use std::time::Duration;

use super::{ActionDefinition, ActionKind, CachePolicy, Category, CommandStep, FOLLOW_TIMEOUT, Operation, locks};
use crate::cache::keys;

/// Step of a static table entry.
enum Step {
    Argv(&'static [&'static str]),
    Shell(&'static str),
}

enum Kind {
    Steps(&'static [Step]),
    Op(Operation),
}

struct Builtin {
    id: &'static str,
    label: &'static str,
    description: &'static str,
    category: Category,
    kind: Kind,
    dangerous: bool,
    requires_machine: bool,
    timeout_s: u64,
    ttl_s: u64,
    invalidates: &'static [&'static str],
    parallel_safe: bool,
    lock: Option<&'static str>,
    follow: bool,
}

const BASE: Builtin = Builtin {
    id: "",
    label: "",
    description: "",
    category: Category::System,
    kind: Kind::Steps(&[]),
    dangerous: false,
    requires_machine: false,
    timeout_s: 300,
    ttl_s: 0,
    invalidates: &[],
    parallel_safe: false,
    lock: None,
    follow: false,
};

const NIX_FEATURES: &str = "nix-command flakes";
const FLAKE_DEPS: &[&str] = &[keys::MACHINE_LIST, keys::DEV_SHELLS];
const SYSTEM: Option<&str> = Some(locks::SYSTEM_PROFILE);
const FLAKE: Option<&str> = Some(locks::FLAKE);
const DOCKER: Option<&str> = Some(locks::DOCKER);
const CONTAINERS: &[&str] = &[keys::CONTAINERS];

#[rustfmt::skip]
static BUILTINS: &[Builtin] = &[
    // ── nixos ──
    Builtin {
        id: "switch", label: "Switch Configuration",
        description: "Apply NixOS configuration immediately using nixos-rebuild switch",
        category: Category::Nixos, requires_machine: true, timeout_s: 3600,
        kind: Kind::Steps(&[Step::Argv(&["sudo", "nixos-rebuild", "switch", "--flake", ".#{machine}"])]),
        invalidates: &["status"],
        lock: SYSTEM,
        ..BASE
    },
    Builtin {
        id: "boot", label: "Boot Configuration",
        description: "Build and set configuration for next boot without activating",
        category: Category::Nixos, requires_machine: true, timeout_s: 3600,
        kind: Kind::Steps(&[Step::Argv(&["sudo", "nixos-rebuild", "boot", "--flake", ".#{machine}"])]),
        invalidates: &["status"],
        lock: SYSTEM,
        ..BASE
    },
    Builtin {
        id: "build", label: "Build Configuration",
        description: "Build the NixOS configuration without applying it",
        category: Category::Nixos, requires_machine: true, timeout_s: 3600,
        kind: Kind::Steps(&[Step::Argv(&[
            "nix", "build", ".#nixosConfigurations.{machine}.config.system.build.toplevel",
            "--extra-experimental-features", NIX_FEATURES,
        ])]),
        lock: SYSTEM,
        ..BASE
    },
    Builtin {
        id: "dry-run", label: "Dry Run",
        description: "Show what changes would be made without applying them",
        category: Category::Nixos, requires_machine: true, timeout_s: 1800,
        kind: Kind::Steps(&[Step::Argv(&["sudo", "nixos-rebuild", "dry-run", "--flake", ".#{machine}"])]),
        lock: SYSTEM,
        ..BASE
    },
    Builtin {
        id: "test", label: "Test Configuration",
        description: "Activate the configuration without adding a boot entry",
        category: Category::Nixos, requires_machine: true, timeout_s: 3600,
        kind: Kind::Steps(&[Step::Argv(&["sudo", "nixos-rebuild", "test", "--flake", ".#{machine}"])]),
        lock: SYSTEM,
        ..BASE
    },
    Builtin {
        id: "update", label: "Update Flake Inputs",
        description: "Update all flake inputs to their latest versions",
        category: Category::Nixos, timeout_s: 900,
        kind: Kind::Steps(&[Step::Argv(&["nix", "flake", "update", "--extra-experimental-features", NIX_FEATURES])]),
        invalidates: FLAKE_DEPS,
        lock: FLAKE,
        ..BASE
    },
    Builtin {
        id: "update-nixpkgs", label: "Update Nixpkgs",
        description: "Update only the nixpkgs input",
        category: Category::Nixos, timeout_s: 900,
        kind: Kind::Steps(&[Step::Argv(&[
            "nix", "flake", "update", "nixpkgs", "--extra-experimental-features", NIX_FEATURES,
        ])]),
        invalidates: FLAKE_DEPS,
        lock: FLAKE,
        ..BASE
    },
    Builtin {
        id: "rebuild-all", label: "Rebuild All Machines",
        description: "Build configurations for all defined machines",
        category: Category::Nixos, timeout_s: 3600,
        kind: Kind::Op(Operation::RebuildAll),
        lock: SYSTEM,
        ..BASE
    },
    Builtin {
        id: "status", label: "System Status",
        description: "Show current and available NixOS generations",
        category: Category::Nixos, requires_machine: true, ttl_s: 30, timeout_s: 60,
        kind: Kind::Steps(&[Step::Argv(&["nixos-rebuild", "list-generations"])]),
        ..BASE
    },
    Builtin {
        id: "health", label: "Health Check",
        description: "Run comprehensive system health diagnostics",
        category: Category::Nixos, ttl_s: 60, timeout_s: 600,
        kind: Kind::Steps(&[Step::Shell(
            "if [ -x scripts/check-system-health.sh ]; then exec scripts/check-system-health.sh; fi; \
             echo 'Running basic health checks...'; \
             if systemctl is-active --quiet nix-daemon; then echo '✓ Nix daemon is running'; \
             else echo '✗ Nix daemon is not running'; fi; \
             echo; echo 'Disk Space:'; df -h /; \
             echo; echo 'Memory:'; free -h",
        )]),
        ..BASE
    },
    Builtin {
        id: "gc", label: "Garbage Collection",
        description: "Remove old generations and free up disk space",
        category: Category::Nixos, timeout_s: 1800,
        kind: Kind::Steps(&[Step::Argv(&["sudo", "nix-collect-garbage", "-d"])]),
        invalidates: &["status"],
        lock: SYSTEM,
        ..BASE
    },
    Builtin {
        id: "optimise", label: "Optimise Store",
        description: "Deduplicate identical files in the Nix store",
        category: Category::Nixos, timeout_s: 3600,
        kind: Kind::Steps(&[Step::Argv(&["sudo", "nix-store", "--optimise"])]),
        lock: SYSTEM,
        ..BASE
    },
    Builtin {
        id: "list-machines", label: "List Machines",
        description: "Show all available machine configurations",
        category: Category::Nixos,
        kind: Kind::Op(Operation::ListMachines),
        ..BASE
    },
    Builtin {
        id: "machine-status", label: "Machines Status",
        description: "Reachability, NixOS version and generation of every machine",
        category: Category::Nixos, timeout_s: 300,
        kind: Kind::Op(Operation::MachineStatus),
        ..BASE
    },
    Builtin {
        id: "rollback", label: "Rollback",
        description: "Roll back to the previous system generation",
        category: Category::Nixos, dangerous: true, requires_machine: true, timeout_s: 1800,
        kind: Kind::Steps(&[Step::Argv(&["sudo", "nixos-rebuild", "switch", "--rollback"])]),
        invalidates: &["status"],
        lock: SYSTEM,
        ..BASE
    },
    Builtin {
        id: "diff", label: "Show Diff",
        description: "Show differences between current and new configuration",
        category: Category::Nixos, requires_machine: true, timeout_s: 3600,
        kind: Kind::Steps(&[
            Step::Argv(&[
                "nix", "build", ".#nixosConfigurations.{machine}.config.system.build.toplevel",
                "--extra-experimental-features", NIX_FEATURES, "-o", "result",
            ]),
            Step::Argv(&["nvd", "diff", "/run/current-system", "result"]),
        ]),
        lock: SYSTEM,
        ..BASE
    },

    // ── docker ──
    Builtin { id: "docker-ps", label: "List Containers", description: "Show all running Docker containers",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "ps"])]), ..BASE },
    Builtin { id: "docker-ps-all", label: "List All Containers", description: "Show all containers including stopped ones",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "ps", "-a"])]), ..BASE },
    Builtin { id: "docker-images", label: "List Images", description: "Show all Docker images on the system",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "images"])]), ..BASE },
    Builtin { id: "docker-compose-up", label: "Compose Up", description: "Start all services defined in docker-compose.yml",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "compose", "up", "-d"])]), lock: DOCKER, invalidates: CONTAINERS, ..BASE },
    Builtin { id: "docker-compose-down", label: "Compose Down", description: "Stop and remove all composed services",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "compose", "down"])]), lock: DOCKER, invalidates: CONTAINERS, ..BASE },
    Builtin { id: "docker-compose-logs", label: "Compose Logs", description: "View logs from all composed services",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "compose", "logs", "--tail=50"])]), ..BASE },
    Builtin { id: "docker-prune", label: "System Prune", description: "Remove unused containers, networks, and images",
        category: Category::Docker, dangerous: true,
        kind: Kind::Steps(&[Step::Argv(&["docker", "system", "prune", "-f"])]), lock: DOCKER, invalidates: CONTAINERS, ..BASE },
    Builtin { id: "docker-prune-all", label: "Full Prune", description: "Remove all unused data including volumes",
        category: Category::Docker, dangerous: true,
        kind: Kind::Steps(&[Step::Argv(&["docker", "system", "prune", "-af", "--volumes"])]), lock: DOCKER, invalidates: CONTAINERS, ..BASE },
    Builtin { id: "docker-stats", label: "Container Stats", description: "Show resource usage of containers",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "stats", "--no-stream"])]), ..BASE },
    Builtin { id: "docker-networks", label: "List Networks", description: "Show all Docker networks",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "network", "ls"])]), ..BASE },
    Builtin { id: "docker-volumes", label: "List Volumes", description: "Show all Docker volumes",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "volume", "ls"])]), ..BASE },
    Builtin { id: "docker-restart-all", label: "Restart All", description: "Restart all running containers",
        category: Category::Docker, dangerous: true,
        kind: Kind::Steps(&[Step::Shell("docker ps -q | xargs -r docker restart")]), lock: DOCKER, invalidates: CONTAINERS, ..BASE },
    Builtin { id: "docker-start", label: "Start Container", description: "Start a stopped container",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "start", "{container}"])]),
        invalidates: CONTAINERS, ..BASE },
    Builtin { id: "docker-stop", label: "Stop Container", description: "Stop a running container",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "stop", "{container}"])]),
        invalidates: CONTAINERS, ..BASE },
    Builtin { id: "docker-restart", label: "Restart Container", description: "Restart a container",
        category: Category::Docker, kind: Kind::Steps(&[Step::Argv(&["docker", "restart", "{container}"])]),
        invalidates: CONTAINERS, ..BASE },
    Builtin { id: "docker-logs", label: "Container Logs", description: "Follow a container's logs (x to stop)",
        category: Category::Docker, follow: true, parallel_safe: true,
        kind: Kind::Steps(&[Step::Argv(&["docker", "logs", "-f", "--tail", "100", "{container}"])]), ..BASE },
    Builtin { id: "docker-rm", label: "Remove Container", description: "Force-remove a container",
        category: Category::Docker, dangerous: true,
        kind: Kind::Steps(&[Step::Argv(&["docker", "rm", "-f", "{container}"])]),
        lock: DOCKER, invalidates: CONTAINERS, ..BASE },

    // ── system ──
    Builtin { id: "sys-info", label: "System Info", description: "Display detailed system information",
        category: Category::System,
        kind: Kind::Steps(&[Step::Shell(
            "echo \"Hostname: $(hostname)\"; \
             . /etc/os-release 2>/dev/null && echo \"OS: $PRETTY_NAME\"; \
             echo \"Kernel: $(uname -r)\"; echo \"Arch: $(uname -m)\"; \
             echo \"Uptime: $(uptime -p 2>/dev/null || uptime)\"",
        )]), ..BASE },
    Builtin { id: "sys-uptime", label: "Uptime", description: "Show system uptime and load averages",
        category: Category::System, kind: Kind::Steps(&[Step::Argv(&["uptime"])]), ..BASE },
    Builtin { id: "sys-memory", label: "Memory Usage", description: "Display memory and swap usage statistics",
        category: Category::System, kind: Kind::Steps(&[Step::Argv(&["free", "-h"])]), ..BASE },
    Builtin { id: "sys-cpu", label: "CPU Info", description: "Show CPU information",
        category: Category::System, kind: Kind::Steps(&[Step::Argv(&["lscpu"])]), ..BASE },
    Builtin { id: "sys-processes", label: "Top Processes", description: "List processes sorted by memory usage",
        category: Category::System, kind: Kind::Steps(&[Step::Shell("ps aux --sort=-%mem | head -25")]), ..BASE },
    Builtin { id: "sys-logs", label: "System Logs", description: "View recent system journal logs",
        category: Category::System, kind: Kind::Steps(&[Step::Argv(&["journalctl", "-n", "50", "--no-pager"])]), ..BASE },
    Builtin { id: "sys-boot-logs", label: "Boot Logs", description: "View logs from the current boot",
        category: Category::System, kind: Kind::Steps(&[Step::Argv(&["journalctl", "-b", "-n", "50", "--no-pager"])]), ..BASE },
    Builtin { id: "logs-follow", label: "Follow System Logs", description: "Stream the system journal (x to stop)",
        category: Category::System, follow: true, parallel_safe: true,
        kind: Kind::Steps(&[Step::Argv(&["journalctl", "-f", "-n", "100", "--no-pager"])]), ..BASE },
    Builtin { id: "logs-kernel", label: "Follow Kernel Logs", description: "Stream kernel messages (x to stop)",
        category: Category::System, follow: true, parallel_safe: true,
        kind: Kind::Steps(&[Step::Argv(&["journalctl", "-f", "-n", "100", "-k", "--no-pager"])]), ..BASE },
    Builtin { id: "sys-reboot", label: "Reboot System", description: "Safely reboot the system",
        category: Category::System, dangerous: true,
        kind: Kind::Steps(&[Step::Argv(&["sudo", "systemctl", "reboot"])]), ..BASE },
    Builtin { id: "sys-shutdown", label: "Shutdown", description: "Safely shutdown the system",
        category: Category::System, dangerous: true,
        kind: Kind::Steps(&[Step::Argv(&["sudo", "systemctl", "poweroff"])]), ..BASE },
    Builtin { id: "sys-suspend", label: "Suspend", description: "Suspend the system to RAM",
        category: Category::System, kind: Kind::Steps(&[Step::Argv(&["systemctl", "suspend"])]), ..BASE },

    // ── git ──
    Builtin { id: "git-status", label: "Status", description: "Show the working tree status",
        category: Category::Git, kind: Kind::Steps(&[Step::Argv(&["git", "status"])]), ..BASE },
    Builtin { id: "git-pull", label: "Pull", description: "Fetch and merge changes from remote",
        category: Category::Git, kind: Kind::Steps(&[Step::Argv(&["git", "pull"])]),
        invalidates: FLAKE_DEPS, lock: FLAKE, ..BASE },
    Builtin { id: "git-push", label: "Push", description: "Push local commits to remote",
        category: Category::Git, kind: Kind::Steps(&[Step::Argv(&["git", "push"])]), ..BASE },
    Builtin { id: "git-log", label: "Log", description: "Show recent commit history",
        category: Category::Git, kind: Kind::Steps(&[Step::Argv(&["git", "log", "--oneline", "-20"])]), ..BASE },
    Builtin { id: "git-diff", label: "Diff", description: "Show uncommitted changes",
        category: Category::Git, kind: Kind::Steps(&[Step::Argv(&["git", "--no-pager", "diff"])]), ..BASE },
    Builtin { id: "git-branch", label: "Branches", description: "List all branches",
        category: Category::Git, kind: Kind::Steps(&[Step::Argv(&["git", "branch", "-a"])]), ..BASE },
    Builtin { id: "git-stash", label: "Stash", description: "Stash current changes",
        category: Category::Git, kind: Kind::Steps(&[Step::Argv(&["git", "stash"])]),
        invalidates: FLAKE_DEPS, lock: FLAKE, ..BASE },
    Builtin { id: "git-stash-pop", label: "Stash Pop", description: "Apply and remove the latest stash",
        category: Category::Git, kind: Kind::Steps(&[Step::Argv(&["git", "stash", "pop"])]),
        invalidates: FLAKE_DEPS, lock: FLAKE, ..BASE },
    Builtin { id: "git-fetch", label: "Fetch", description: "Download objects from remote",
        category: Category::Git, kind: Kind::Steps(&[Step::Argv(&["git", "fetch", "--all"])]), ..BASE },
    Builtin { id: "git-reset", label: "Reset Hard", description: "Reset working directory to HEAD",
        category: Category::Git, dangerous: true,
        kind: Kind::Steps(&[Step::Argv(&["git", "reset", "--hard", "HEAD"])]),
        invalidates: FLAKE_DEPS, lock: FLAKE, ..BASE },
    Builtin { id: "git-clean", label: "Clean", description: "Remove untracked files",
        category: Category::Git, dangerous: true,
        kind: Kind::Steps(&[Step::Argv(&["git", "clean", "-fd"])]),
        invalidates: FLAKE_DEPS, lock: FLAKE, ..BASE },

    // ── network ──
    Builtin { id: "net-status", label: "Network Status", description: "Show network interface status",
        category: Category::Network, kind: Kind::Steps(&[Step::Argv(&["ip", "link", "show"])]), ..BASE },
    Builtin { id: "net-ip", label: "IP Addresses", description: "Display all IP addresses",
        category: Category::Network, kind: Kind::Steps(&[Step::Argv(&["ip", "addr", "show"])]), ..BASE },
    Builtin { id: "net-connections", label: "Active Connections", description: "Show all active network connections",
        category: Category::Network, kind: Kind::Steps(&[Step::Argv(&["ss", "-tuln"])]), ..BASE },
    Builtin { id: "net-ports", label: "Listening Ports", description: "Show all listening ports",
        category: Category::Network, kind: Kind::Steps(&[Step::Argv(&["ss", "-tlnp"])]), ..BASE },
    Builtin { id: "net-ping", label: "Ping Test", description: "Test connectivity to common endpoints",
        category: Category::Network, timeout_s: 30,
        kind: Kind::Steps(&[Step::Shell(
            "for host in google.com cloudflare.com github.com; do \
             if ping -c 1 -W 2 \"$host\" >/dev/null 2>&1; then echo \"✓ $host reachable\"; \
             else echo \"✗ $host unreachable\"; fi; done",
        )]), ..BASE },
    Builtin { id: "net-dns", label: "DNS Lookup", description: "Perform DNS resolution tests",
        category: Category::Network, timeout_s: 30,
        kind: Kind::Steps(&[Step::Shell(
            "for domain in google.com github.com nixos.org; do \
             if nslookup \"$domain\" >/dev/null 2>&1; then echo \"✓ $domain: resolved\"; \
             else echo \"✗ $domain: failed\"; fi; done",
        )]), ..BASE },
    Builtin { id: "net-trace", label: "Traceroute", description: "Trace route to a public resolver",
        category: Category::Network, timeout_s: 120,
        kind: Kind::Steps(&[Step::Argv(&["traceroute", "-m", "15", "8.8.8.8"])]), ..BASE },
    Builtin { id: "net-wifi", label: "WiFi Status", description: "Show WiFi connection status",
        category: Category::Network, kind: Kind::Steps(&[Step::Argv(&["nmcli", "device", "wifi", "list"])]), ..BASE },
    Builtin { id: "net-firewall", label: "Firewall Rules", description: "Display current firewall rules",
        category: Category::Network, kind: Kind::Steps(&[Step::Argv(&["sudo", "iptables", "-L", "-n"])]), ..BASE },
    Builtin { id: "net-bandwidth", label: "Bandwidth Test", description: "Test network bandwidth (requires speedtest-cli)",
        category: Category::Network, kind: Kind::Steps(&[Step::Argv(&["speedtest-cli", "--simple"])]), ..BASE },

    // ── services ──
    Builtin { id: "svc-list", label: "List Services", description: "Show all systemd services",
        category: Category::Services,
        kind: Kind::Steps(&[Step::Argv(&["systemctl", "list-units", "--type=service", "--no-pager"])]), ..BASE },
    Builtin { id: "svc-running", label: "Running Services", description: "Show only running services",
        category: Category::Services,
        kind: Kind::Steps(&[Step::Argv(&["systemctl", "list-units", "--type=service", "--state=running", "--no-pager"])]), ..BASE },
    Builtin { id: "svc-failed", label: "Failed Services", description: "Show failed services",
        category: Category::Services, kind: Kind::Steps(&[Step::Argv(&["systemctl", "--failed", "--no-pager"])]), ..BASE },
    Builtin { id: "svc-timers", label: "Active Timers", description: "Show all active systemd timers",
        category: Category::Services, kind: Kind::Steps(&[Step::Argv(&["systemctl", "list-timers", "--no-pager"])]), ..BASE },
    Builtin { id: "svc-reload", label: "Reload Daemon", description: "Reload systemd daemon configuration",
        category: Category::Services, kind: Kind::Steps(&[Step::Argv(&["sudo", "systemctl", "daemon-reload"])]), ..BASE },
    Builtin { id: "svc-logs", label: "Follow Unit Logs", description: "Stream the journal of one unit (x to stop)",
        category: Category::Services, follow: true, parallel_safe: true,
        kind: Kind::Steps(&[Step::Argv(&["journalctl", "-f", "-n", "100", "-u", "{unit}", "--no-pager"])]), ..BASE },
    Builtin { id: "svc-status", label: "Service Status", description: "Check the status of a systemd unit",
        category: Category::Services,
        kind: Kind::Steps(&[Step::Argv(&["systemctl", "status", "{unit}", "--no-pager"])]), ..BASE },

    // ── storage ──
    Builtin { id: "disk-usage", label: "Disk Usage", description: "Show disk space usage for all mounts",
        category: Category::Storage, kind: Kind::Steps(&[Step::Argv(&["df", "-h"])]), ..BASE },
    Builtin { id: "disk-free", label: "Free Space", description: "Show available disk space",
        category: Category::Storage, kind: Kind::Steps(&[Step::Argv(&["df", "-h", "--output=target,avail,pcent"])]), ..BASE },
    Builtin { id: "disk-mounts", label: "Mount Points", description: "List all mounted filesystems",
        category: Category::Storage, kind: Kind::Steps(&[Step::Argv(&["findmnt"])]), ..BASE },
    Builtin { id: "disk-io", label: "I/O Stats", description: "Show disk I/O statistics",
        category: Category::Storage, kind: Kind::Steps(&[Step::Argv(&["iostat", "-x", "1", "1"])]), ..BASE },
    Builtin { id: "disk-largest", label: "Largest Directories", description: "Find the largest directories on disk",
        category: Category::Storage, timeout_s: 900,
        kind: Kind::Steps(&[Step::Shell("sudo du -ah / --max-depth=3 2>/dev/null | sort -rh | head -20")]), ..BASE },
    Builtin { id: "disk-inodes", label: "Inode Usage", description: "Show inode usage for filesystems",
        category: Category::Storage, kind: Kind::Steps(&[Step::Argv(&["df", "-i"])]), ..BASE },
    Builtin { id: "zfs-status", label: "ZFS Status", description: "Show ZFS pool status",
        category: Category::Storage, kind: Kind::Steps(&[Step::Argv(&["zpool", "status"])]), ..BASE },
    Builtin { id: "zfs-list", label: "ZFS Datasets", description: "List all ZFS datasets",
        category: Category::Storage, kind: Kind::Steps(&[Step::Argv(&["zfs", "list"])]), ..BASE },
    Builtin { id: "zfs-snapshots", label: "ZFS Snapshots", description: "List all ZFS snapshots",
        category: Category::Storage, kind: Kind::Steps(&[Step::Argv(&["zfs", "list", "-t", "snapshot"])]), ..BASE },
    Builtin { id: "smart-status", label: "SMART Status", description: "Check disk health via SMART",
        category: Category::Storage, timeout_s: 120,
        kind: Kind::Steps(&[Step::Shell(
            "lsblk -d -n -o NAME,TYPE | while read -r name type; do \
             [ \"$type\" = disk ] || continue; \
             out=$(sudo smartctl -H \"/dev/$name\" 2>&1); \
             case \"$out\" in *PASSED*) echo \"✓ /dev/$name: PASSED\";; \
             *FAILED*) echo \"✗ /dev/$name: FAILED\";; *) echo \"? /dev/$name: unknown\";; esac; done",
        )]), ..BASE },

    // ── vm ──
    Builtin { id: "vm-list", label: "List VMs", description: "Show all virtual machines and their status",
        category: Category::Vm, kind: Kind::Steps(&[Step::Argv(&["virsh", "list", "--all"])]), ..BASE },
    Builtin { id: "vm-info", label: "VM Info", description: "Show detailed information about a VM",
        category: Category::Vm, kind: Kind::Steps(&[Step::Argv(&["virsh", "dominfo", "{vm}"])]), ..BASE },
    Builtin { id: "vm-start", label: "Start VM", description: "Start a virtual machine",
        category: Category::Vm, kind: Kind::Steps(&[Step::Argv(&["virsh", "start", "{vm}"])]), ..BASE },
    Builtin { id: "vm-shutdown", label: "Shutdown VM", description: "Gracefully shutdown a virtual machine",
        category: Category::Vm, kind: Kind::Steps(&[Step::Argv(&["virsh", "shutdown", "{vm}"])]), ..BASE },
    Builtin { id: "vm-reboot", label: "Reboot VM", description: "Reboot a virtual machine",
        category: Category::Vm, kind: Kind::Steps(&[Step::Argv(&["virsh", "reboot", "{vm}"])]), ..BASE },
    Builtin { id: "vm-force-stop", label: "Force Stop VM", description: "Forcefully stop a virtual machine",
        category: Category::Vm, dangerous: true,
        kind: Kind::Steps(&[Step::Argv(&["virsh", "destroy", "{vm}"])]), ..BASE },
    Builtin { id: "vm-suspend", label: "Suspend VM", description: "Suspend a virtual machine",
        category: Category::Vm, kind: Kind::Steps(&[Step::Argv(&["virsh", "suspend", "{vm}"])]), ..BASE },
    Builtin { id: "vm-resume", label: "Resume VM", description: "Resume a suspended virtual machine",
        category: Category::Vm, kind: Kind::Steps(&[Step::Argv(&["virsh", "resume", "{vm}"])]), ..BASE },
    Builtin { id: "vm-stats", label: "VM Stats", description: "Show resource usage statistics for VMs",
        category: Category::Vm, kind: Kind::Steps(&[Step::Argv(&["virsh", "domstats", "--state", "--cpu-total", "--balloon"])]), ..BASE },
    Builtin { id: "vm-networks", label: "List Networks", description: "Show all virtual networks",
        category: Category::Vm, kind: Kind::Steps(&[Step::Argv(&["virsh", "net-list", "--all"])]), ..BASE },
    Builtin { id: "vm-pools", label: "List Storage Pools", description: "Show all storage pools",
        category: Category::Vm, kind: Kind::Steps(&[Step::Argv(&["virsh", "pool-list", "--all"])]), ..BASE },
    Builtin { id: "create-vm", label: "Create VM", description: "Create a disk image and define a new virtual machine",
        category: Category::Vm, timeout_s: 900,
        kind: Kind::Op(Operation::CreateVm), invalidates: &[keys::VM_LIST], ..BASE },

    // ── dev ──
    Builtin { id: "dev-shells", label: "Dev Shells", description: "List the development shells defined by the flake",
        category: Category::Dev, kind: Kind::Op(Operation::ListDevShells), ..BASE },
];

/// Materialize the static table into owned definitions.
pub fn definitions() -> Vec<ActionDefinition> {
    BUILTINS.iter().map(to_definition).collect()
}

fn to_definition(b: &Builtin) -> ActionDefinition {
    let kind = match &b.kind {
        Kind::Steps(steps) => ActionKind::Command(
            steps
                .iter()
                .map(|s| match s {
                    Step::Argv(args) => CommandStep::argv(args),
                    Step::Shell(pipeline) => CommandStep::shell(pipeline),
                })
                .collect(),
        ),
        Kind::Op(op) => ActionKind::Operation(*op),
    };
    ActionDefinition {
        id: b.id.to_string(),
        label: b.label.to_string(),
        description: b.description.to_string(),
        category: b.category,
        kind,
        dangerous: b.dangerous,
        requires_machine: b.requires_machine,
        timeout: if b.follow {
            FOLLOW_TIMEOUT
        } else {
            Duration::from_secs(b.timeout_s)
        },
        cache: (b.ttl_s > 0).then(|| CachePolicy {
            ttl: Duration::from_secs(b.ttl_s),
        }),
        invalidates: b.invalidates.iter().map(|s| s.to_string()).collect(),
        parallel_safe: b.parallel_safe,
        lock: b.lock.map(String::from),
        follow: b.follow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let mut seen = HashSet::new();
        for b in BUILTINS {
            assert!(seen.insert(b.id), "duplicate builtin id: {}", b.id);
        }
    }

    #[test]
    fn every_category_has_actions() {
        let defs = definitions();
        for c in Category::ALL {
            assert!(defs.iter().any(|d| d.category == c), "{c} has no actions");
        }
    }

    #[test]
    fn machine_placeholder_implies_requires_machine() {
        for def in definitions() {
            if def.placeholders().contains("machine") {
                assert!(def.requires_machine, "{} uses {{machine}}", def.id);
            }
        }
    }

    #[test]
    fn vm_actions_take_a_vm_argument() {
        let defs = definitions();
        let start = defs.iter().find(|d| d.id == "vm-start").unwrap();
        assert_eq!(start.extra_placeholders(), vec!["vm".to_string()]);
    }

    #[test]
    fn follow_actions_are_never_cached() {
        for def in definitions().into_iter().filter(|d| d.follow) {
            assert!(def.cache.is_none(), "{} follows but caches", def.id);
            assert_eq!(def.timeout, FOLLOW_TIMEOUT, "{}", def.id);
        }
    }

    #[test]
    fn rebuilds_share_the_system_lock() {
        let defs = definitions();
        for id in ["switch", "boot", "test", "rebuild-all", "gc"] {
            let def = defs.iter().find(|d| d.id == id).unwrap();
            assert_eq!(def.lock.as_deref(), Some(locks::SYSTEM_PROFILE), "{id}");
        }
    }

    #[test]
    fn container_actions_take_a_container_argument() {
        let defs = definitions();
        for id in ["docker-start", "docker-stop", "docker-restart", "docker-logs", "docker-rm"] {
            let def = defs.iter().find(|d| d.id == id).unwrap();
            assert_eq!(def.extra_placeholders(), vec!["container".to_string()], "{id}");
        }
    }

    #[test]
    fn rebuild_all_is_an_operation() {
        let defs = definitions();
        let def = defs.iter().find(|d| d.id == "rebuild-all").unwrap();
        assert_eq!(def.kind, ActionKind::Operation(Operation::RebuildAll));
        assert!(def.steps().is_empty());
    }
}
