//! The fixed provisioning script and its runner.
//!
//! The script is the only configuration surface of real consequence: every
//! expect string must stay in lock-step with the banners, prompts, and
//! service names the guest actually produces. Any mismatch manifests only
//! as a timeout on that step.
//!
//! Execution is a strict linear state machine over the console: send one
//! literal command, await one literal pattern, abort the whole run on the
//! first failure. Nothing here parses the remote output; the guest-side
//! error trap powers the machine off on any command failure, so a remote
//! failure is observed host-side as the console going quiet or closing.

use colored::Colorize;
use std::time::{Duration, Instant};

use crate::console::Console;
use crate::error::Result;
use crate::qemu::SHARE_TAG;

/// Shell prompt awaited between commands.
pub const PROMPT: &str = "# ";
/// Login banner of the installer environment.
const LOGIN_PROMPT: &str = "login:";
const PASSWORD_PROMPT: &str = "Password:";
/// Printed by the guest kernel once it has actually powered down - a
/// clean-shutdown signal distinguishable from a hang.
pub const POWER_DOWN: &str = "reboot: Power down";

/// One send/await transition of the provisioning state machine.
///
/// A step always sends first and awaits second; there is no way to express
/// an await-before-send step.
pub struct Step {
    pub name: &'static str,
    /// Literal bytes typed into the console, newline-terminated where the
    /// remote shell is meant to execute them.
    pub send: String,
    /// Literal pattern that must appear before the next step may run.
    pub expect: String,
    /// Override for steps known to run long; `None` uses the run default.
    pub timeout: Option<Duration>,
}

impl Step {
    fn new(name: &'static str, send: impl Into<String>, expect: impl Into<String>) -> Self {
        Self {
            name,
            send: send.into(),
            expect: expect.into(),
            timeout: None,
        }
    }

    fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }
}

/// The fixed step sequence, in execution order.
///
/// Timeout overrides are fixed per step, sized for the work each one is
/// known to do (bulk package update, image build, artifact copy), not
/// adaptive.
pub fn provisioning_script() -> Vec<Step> {
    vec![
        // The kernel takes a while to reach the login banner; the newline
        // just nudges a getty that may have already drawn it.
        Step::new("boot-wait", "\n", LOGIN_PROMPT).with_timeout(300),
        Step::new("login", "root\n", PASSWORD_PROMPT),
        Step::new("password", "manjaro\n", PROMPT),
        Step::new("shell-switch", "bash\n", PROMPT),
        // From here on, any failed command powers the guest off.
        Step::new(
            "error-trap",
            "set -eE; trap 'systemctl poweroff --force' ERR\n",
            PROMPT,
        ),
        Step::new(
            "mount-shared",
            format!(
                "mkdir -p /mnt/host && mount -t 9p -o trans=virtio,version=9p2000.L {} /mnt/host\n",
                SHARE_TAG
            ),
            PROMPT,
        ),
        Step::new(
            "format-scratch",
            "mkfs.ext4 -q -F /dev/vda && mkdir -p /build && mount /dev/vda /build\n",
            PROMPT,
        )
        .with_timeout(120),
        Step::new("copy-inputs", "cp -a /mnt/host/profile /build/profile\n", PROMPT)
            .with_timeout(120),
        Step::new(
            "bind-pkg-cache",
            "mkdir -p /mnt/host/pkgcache && mount --bind /mnt/host/pkgcache /var/cache/pacman/pkg\n",
            PROMPT,
        ),
        // pacman-init seeds the keyring on first boot; package installs
        // fail until it finishes.
        Step::new(
            "wait-keyring",
            "until systemctl show -p SubState pacman-init.service | grep -q exited; do sleep 2; done\n",
            PROMPT,
        )
        .with_timeout(600),
        Step::new(
            "install-packages",
            "pacman -Syu --noconfirm --needed manjaro-tools-iso git\n",
            PROMPT,
        )
        .with_timeout(1800),
        Step::new("run-build", "cd /build/profile && ./build.sh\n", PROMPT).with_timeout(3600),
        Step::new(
            "copy-artifacts",
            "mkdir -p /mnt/host/out && cp -a /build/out/. /mnt/host/out/\n",
            PROMPT,
        )
        .with_timeout(900),
        Step::new("shutdown", "systemctl poweroff\n", POWER_DOWN).with_timeout(120),
    ]
}

/// Drive the script to completion, aborting on the first failure.
///
/// Step N+1 is never issued before step N's await succeeds. Progress goes
/// to stderr; stdout stays a clean mirror of the console itself.
pub fn run_script(console: &mut Console, steps: &[Step], default_timeout: Duration) -> Result<()> {
    for step in steps {
        let timeout = step.timeout.unwrap_or(default_timeout);
        eprintln!(
            "{} {} (await {:?}, {}s)",
            "▶".cyan(),
            step.name,
            step.expect,
            timeout.as_secs()
        );

        let start = Instant::now();
        console.send(&step.send)?;
        match console.expect(&step.expect, timeout) {
            Ok(()) => {
                eprintln!(
                    "{} {} ({:.1}s)",
                    "✓".green(),
                    step.name,
                    start.elapsed().as_secs_f64()
                );
            }
            Err(e) => {
                eprintln!(
                    "{} {} ({:.1}s)",
                    "✗".red().bold(),
                    step.name,
                    start.elapsed().as_secs_f64()
                );
                return Err(e);
            }
        }
    }
    Ok(())
}
