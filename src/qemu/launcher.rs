//! VM process launch and ownership.
//!
//! Fails fast before any VM start: every boot artifact must exist and the
//! scratch disk must preallocate. Once spawned, the process is held by an
//! owned [`VmProcess`] whose termination is part of the cleanup contract -
//! killing the process group and waiting for actual exit, not just
//! delivering a signal.

use std::path::Path;
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::console::Console;
use crate::error::{ProvisionError, Result};
use crate::qemu::QemuBuilder;

/// Owned handle to the running VM process.
pub struct VmProcess {
    child: Child,
}

impl VmProcess {
    pub(crate) fn from_child(child: Child) -> Self {
        Self { child }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Wait up to `timeout` for the process to exit on its own.
    ///
    /// Returns true if it exited (and was reaped), false if it is still
    /// running when the deadline passes.
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    thread::sleep(Duration::from_millis(100));
                }
                Err(_) => return false,
            }
        }
    }

    /// Terminate the whole process group and wait for actual exit.
    ///
    /// Idempotent: a process that already exited and was reaped is left
    /// alone.
    pub fn kill_and_reap(&mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        // The child was spawned with process_group(0), so its pid is the
        // pgid; this reaches any children QEMU forked as well.
        unsafe {
            libc::killpg(self.child.id() as libc::pid_t, libc::SIGKILL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Check every boot artifact before any VM start.
///
/// Also ensures the shared directory exists host-side; the guest mounts it
/// early in the script and a missing export only shows up as a timeout.
pub fn preflight(cfg: &Config) -> Result<()> {
    require(&cfg.kernel, "kernel image")?;
    require(&cfg.initrd, "initrd image")?;
    require(&cfg.installer_image, "installer image")?;
    std::fs::create_dir_all(&cfg.share_dir)?;
    require(&cfg.share_dir.join("profile"), "build profile under share dir")?;
    Ok(())
}

fn require(path: &Path, what: &'static str) -> Result<()> {
    if !path.exists() {
        return Err(ProvisionError::MissingArtifact {
            what,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Spawn the VM with its console wired before the first boot byte.
pub fn spawn(cfg: &Config, scratch_disk: &Path) -> Result<(VmProcess, Console)> {
    let mut child = QemuBuilder::new()
        .cpus(cfg.cpus)
        .memory(&cfg.memory)
        .kernel(cfg.kernel.clone())
        .initrd(cfg.initrd.clone())
        .append(&cfg.kernel_cmdline())
        .installer(cfg.installer_image.clone())
        .scratch_disk(scratch_disk.to_path_buf())
        .share_dir(cfg.share_dir.clone())
        .build_piped()
        .spawn()
        .map_err(|e| ProvisionError::Launch {
            reason: "failed to spawn qemu-system-x86_64".to_string(),
            source: Some(e),
        })?;

    let console = match Console::new(&mut child) {
        Ok(console) => console,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    };

    Ok((VmProcess::from_child(child), console))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    fn spawn_grouped(cmd: &str, args: &[&str]) -> Child {
        Command::new(cmd)
            .args(args)
            .process_group(0)
            .spawn()
            .unwrap()
    }

    fn alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[test]
    fn kill_and_reap_leaves_no_process() {
        let child = spawn_grouped("sleep", &["30"]);
        let pid = child.id();
        let mut vm = VmProcess::from_child(child);
        assert!(alive(pid));

        vm.kill_and_reap();
        assert!(!alive(pid));
    }

    #[test]
    fn kill_and_reap_is_idempotent_after_exit() {
        let child = spawn_grouped("true", &[]);
        let mut vm = VmProcess::from_child(child);
        assert!(vm.wait_timeout(Duration::from_secs(5)));

        vm.kill_and_reap();
        vm.kill_and_reap();
    }

    #[test]
    fn wait_timeout_reports_still_running() {
        let child = spawn_grouped("sleep", &["30"]);
        let mut vm = VmProcess::from_child(child);

        assert!(!vm.wait_timeout(Duration::from_millis(200)));
        vm.kill_and_reap();
    }

    #[test]
    fn preflight_rejects_missing_kernel() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            kernel: dir.path().join("vmlinuz"),
            initrd: dir.path().join("initrd.img"),
            installer_image: dir.path().join("installer.iso"),
            scratch_gib: 1,
            cpus: 1,
            memory: "512M".to_string(),
            share_dir: dir.path().join("share"),
            output_dir: dir.path().join("out"),
            step_timeout_secs: 1,
        };

        let err = preflight(&cfg).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::MissingArtifact {
                what: "kernel image",
                ..
            }
        ));
    }
}
