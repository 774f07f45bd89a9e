//! Run configuration.
//!
//! Everything the launcher needs to boot the machine, plus the host-side
//! directories the run reads inputs from and publishes artifacts to.
//! Loaded from a TOML file; the CLI may override individual values.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ProvisionError, Result};

/// Boot media, resource limits, and host directories for one run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Kernel image for direct boot.
    pub kernel: PathBuf,
    /// Initrd matching the kernel.
    pub initrd: PathBuf,
    /// Installer/boot image, attached as a read-only block device.
    pub installer_image: PathBuf,
    /// Scratch disk size in GiB, fully preallocated at launch.
    #[serde(default = "default_scratch_gib")]
    pub scratch_gib: u32,
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    /// Memory size in QEMU syntax (e.g. "4G").
    #[serde(default = "default_memory")]
    pub memory: String,
    /// Host directory shared read/write into the guest. Build inputs are
    /// read from `<share_dir>/profile`; the guest leaves artifacts under
    /// `<share_dir>/out`.
    pub share_dir: PathBuf,
    /// Where finished artifacts are published on success.
    pub output_dir: PathBuf,
    /// Default await timeout in seconds for steps without an override.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
}

fn default_scratch_gib() -> u32 {
    4
}

fn default_cpus() -> u32 {
    4
}

fn default_memory() -> String {
    "4G".to_string()
}

fn default_step_timeout() -> u64 {
    60
}

impl Config {
    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ProvisionError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ProvisionError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Kernel command line fixing console redirection and network/locale
    /// parameters. The serial console must land on ttyS0 or the transport
    /// sees nothing.
    pub fn kernel_cmdline(&self) -> String {
        "console=ttyS0,115200n8 net.ifnames=0 systemd.show_status=0 lang=en_US.UTF-8".to_string()
    }
}
