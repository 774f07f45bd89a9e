//! QEMU command builder for provisioning runs.
//!
//! Assembles the fixed boot configuration: direct kernel boot with the
//! installer image attached read-only, a preallocated raw scratch disk,
//! a 9p share of a host directory, and the serial console on stdio so the
//! transport owns it from the first boot byte.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{ProvisionError, Result};

/// Mount tag under which the shared host directory appears in the guest.
pub const SHARE_TAG: &str = "hostshare";

/// Builder for the VM command line - consolidates the boot configuration.
#[derive(Default)]
pub struct QemuBuilder {
    cpus: Option<u32>,
    memory: Option<String>,
    kernel: Option<PathBuf>,
    initrd: Option<PathBuf>,
    append: Option<String>,
    installer: Option<PathBuf>,
    scratch_disk: Option<PathBuf>,
    share_dir: Option<PathBuf>,
}

impl QemuBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set guest CPU count (default: 2)
    pub fn cpus(mut self, n: u32) -> Self {
        self.cpus = Some(n);
        self
    }

    /// Set memory size (e.g. "512M", "4G")
    pub fn memory(mut self, mem: &str) -> Self {
        self.memory = Some(mem.to_string());
        self
    }

    /// Set kernel for direct boot
    pub fn kernel(mut self, path: PathBuf) -> Self {
        self.kernel = Some(path);
        self
    }

    /// Set initrd for direct boot
    pub fn initrd(mut self, path: PathBuf) -> Self {
        self.initrd = Some(path);
        self
    }

    /// Set kernel command line arguments
    pub fn append(mut self, args: &str) -> Self {
        self.append = Some(args.to_string());
        self
    }

    /// Attach the installer image read-only via virtio-scsi
    pub fn installer(mut self, path: PathBuf) -> Self {
        self.installer = Some(path);
        self
    }

    /// Attach the raw scratch disk as a virtio drive
    pub fn scratch_disk(mut self, path: PathBuf) -> Self {
        self.scratch_disk = Some(path);
        self
    }

    /// Share a host directory read/write into the guest under [`SHARE_TAG`]
    pub fn share_dir(mut self, path: PathBuf) -> Self {
        self.share_dir = Some(path);
        self
    }

    /// Build the QEMU command with the serial console piped for automation.
    ///
    /// The child gets its own process group so teardown can take down QEMU
    /// and anything it spawned in one signal.
    pub fn build_piped(self) -> Command {
        let mut cmd = self.build_base();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd.process_group(0);
        cmd
    }

    fn build_base(self) -> Command {
        let mut cmd = Command::new("qemu-system-x86_64");

        // No default devices; every drive below is explicit.
        cmd.arg("-nodefaults");

        let cpus = self.cpus.unwrap_or(2);
        cmd.args(["-smp", &cpus.to_string()]);

        let mem = self.memory.as_deref().unwrap_or("2G");
        cmd.args(["-m", mem]);

        if let Some(kernel) = &self.kernel {
            cmd.arg("-kernel");
            cmd.arg(kernel);
        }
        if let Some(initrd) = &self.initrd {
            cmd.arg("-initrd");
            cmd.arg(initrd);
        }
        if let Some(append) = &self.append {
            cmd.args(["-append", append]);
        }

        // Installer image (read-only, virtio-scsi for modern kernels)
        if let Some(installer) = &self.installer {
            cmd.args([
                "-device",
                "virtio-scsi-pci,id=scsi0",
                "-device",
                "scsi-cd,drive=cdrom0,bus=scsi0.0",
                "-drive",
                &format!(
                    "id=cdrom0,if=none,format=raw,readonly=on,file={}",
                    installer.display()
                ),
            ]);
        }

        // Scratch disk (raw, preallocated by create_scratch_disk)
        if let Some(disk) = &self.scratch_disk {
            cmd.args([
                "-drive",
                &format!("file={},format=raw,if=virtio,cache=none", disk.display()),
            ]);
        }

        // Shared host directory
        if let Some(dir) = &self.share_dir {
            cmd.args([
                "-virtfs",
                &format!(
                    "local,path={},mount_tag={},security_model=mapped-xattr",
                    dir.display(),
                    SHARE_TAG
                ),
            ]);
        }

        // Serial console on stdio, no graphics, halt instead of reboot
        cmd.args(["-nographic", "-serial", "mon:stdio"]);
        cmd.arg("-no-reboot");

        cmd
    }
}

/// Create the fully preallocated raw scratch disk image.
///
/// Preallocation makes an out-of-space host fail here, at launch, instead
/// of partway through the build.
pub fn create_scratch_disk(path: &Path, size_gib: u32) -> Result<()> {
    let status = Command::new("qemu-img")
        .args(["create", "-f", "raw", "-o", "preallocation=full"])
        .arg(path)
        .arg(format!("{}G", size_gib))
        .stdout(Stdio::null())
        .status()
        .map_err(|e| ProvisionError::Launch {
            reason: "failed to run qemu-img".to_string(),
            source: Some(e),
        })?;

    if !status.success() {
        return Err(ProvisionError::Launch {
            reason: format!(
                "qemu-img create failed for {} ({} GiB) - is the host out of disk space?",
                path.display(),
                size_gib
            ),
            source: None,
        });
    }
    Ok(())
}
