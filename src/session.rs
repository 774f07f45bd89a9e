//! Run lifecycle: scoped ownership of every resource a run acquires.
//!
//! The [`Session`] owns the VM process, its console, and the temporary
//! working directory holding the scratch disk. Dropping it terminates the
//! VM's process group, waits for actual exit, and removes the temp
//! directory - on every exit path, success or failure. No signal traps,
//! no ambient state.

use std::time::Duration;

use tempfile::TempDir;

use crate::config::Config;
use crate::console::Console;
use crate::error::Result;
use crate::qemu::{self, VmProcess};

/// The live automation context for one provisioning run.
pub struct Session {
    /// Console transport; the script runner drives it exclusively.
    pub console: Console,
    vm: VmProcess,
    /// Holds the scratch disk; removed when the session ends.
    temp_dir: TempDir,
    default_timeout: Duration,
}

impl Session {
    /// Preflight, preallocate the scratch disk, boot the VM, and wire the
    /// console before the first boot byte.
    ///
    /// Nothing is acquired until preflight passes, so a missing boot
    /// artifact leaves no trace on the host.
    pub fn launch(cfg: &Config) -> Result<Self> {
        qemu::preflight(cfg)?;

        let temp_dir = TempDir::with_prefix("vm-provision-")?;
        let scratch = temp_dir.path().join("scratch.img");
        qemu::create_scratch_disk(&scratch, cfg.scratch_gib)?;

        let (vm, console) = qemu::spawn(cfg, &scratch)?;
        Ok(Self {
            console,
            vm,
            temp_dir,
            default_timeout: cfg.step_timeout(),
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn vm_pid(&self) -> u32 {
        self.vm.pid()
    }

    /// Graceful end of a successful run: the guest has been told to power
    /// off, so give the process a moment to exit by itself before the
    /// drop guarantee takes over.
    pub fn close(mut self) -> Result<()> {
        if !self.vm.wait_timeout(Duration::from_secs(30)) {
            self.vm.kill_and_reap();
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Idempotent: a no-op if close() already reaped the process.
        self.vm.kill_and_reap();
        // temp_dir (and the scratch disk inside it) is removed by its own
        // drop right after.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::os::unix::process::CommandExt;
    use std::path::PathBuf;
    use std::process::Command;

    fn fake_session(cmd: &str, args: &[&str]) -> (Session, u32, PathBuf) {
        let temp_dir = TempDir::with_prefix("vm-provision-test-").unwrap();
        let temp_path = temp_dir.path().to_path_buf();
        let child = Command::new(cmd)
            .args(args)
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id();
        let console = Console::from_io(
            io::Cursor::new(Vec::new()),
            io::sink(),
            Box::new(io::sink()),
        );
        let session = Session {
            console,
            vm: VmProcess::from_child(child),
            temp_dir,
            default_timeout: Duration::from_secs(1),
        };
        (session, pid, temp_path)
    }

    fn alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[test]
    fn drop_kills_vm_and_removes_temp_dir() {
        let (session, pid, temp_path) = fake_session("sleep", &["30"]);
        assert!(alive(pid));
        assert!(temp_path.exists());

        drop(session);
        assert!(!alive(pid));
        assert!(!temp_path.exists());
    }

    #[test]
    fn close_waits_for_guest_exit_then_cleans_up() {
        let (session, pid, temp_path) = fake_session("true", &[]);

        session.close().unwrap();
        assert!(!alive(pid));
        assert!(!temp_path.exists());
    }

    #[test]
    fn cleanup_runs_after_mid_script_timeout() {
        let (console, guest_out, _to_guest, _sink) = crate::console::testing::wired();
        let temp_dir = TempDir::with_prefix("vm-provision-test-").unwrap();
        let temp_path = temp_dir.path().to_path_buf();
        let child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id();
        let mut session = Session {
            console,
            vm: VmProcess::from_child(child),
            temp_dir,
            default_timeout: Duration::from_millis(100),
        };

        // A guest that boots and then goes silent mid-script.
        guest_out.send(b"installer login: ".to_vec()).unwrap();
        let steps = vec![
            crate::script::Step {
                name: "boot-wait",
                send: "\n".to_string(),
                expect: "login:".to_string(),
                timeout: None,
            },
            crate::script::Step {
                name: "login",
                send: "root\n".to_string(),
                expect: "Password:".to_string(),
                timeout: None,
            },
        ];
        let timeout = session.default_timeout();
        let err = crate::script::run_script(&mut session.console, &steps, timeout).unwrap_err();
        assert!(matches!(err, crate::error::ProvisionError::Timeout { .. }));

        // The failure unwinds to the session; cleanup still completes.
        drop(session);
        assert!(!alive(pid));
        assert!(!temp_path.exists());
    }

    #[test]
    fn launch_failure_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            kernel: dir.path().join("missing-vmlinuz"),
            initrd: dir.path().join("missing-initrd"),
            installer_image: dir.path().join("missing.iso"),
            scratch_gib: 1,
            cpus: 1,
            memory: "512M".to_string(),
            share_dir: dir.path().join("share"),
            output_dir: dir.path().join("out"),
            step_timeout_secs: 1,
        };

        assert!(Session::launch(&cfg).is_err());
        // Preflight failed before any acquisition: no scratch disk, no
        // stray temp dirs under the share.
        assert!(!dir.path().join("share").join("scratch.img").exists());
    }
}
