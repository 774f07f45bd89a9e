//! Unattended VM provisioning runner.
//!
//! Boots an installer image in QEMU, drives its serial console through a
//! fixed command script (partition the scratch disk, install packages, run
//! the build), copies the produced artifacts back to the host, and powers
//! the machine off - with no human present.
//!
//! The interesting part is the console engine: the guest's serial console
//! is an opaque, unbuffered byte stream, and the only synchronization
//! primitive available is "send a literal string, then wait until another
//! literal string appears or a deadline passes". See [`console`] for how
//! that is made reliable, and [`script`] for the fixed step sequence
//! executed through it.

pub mod artifact;
pub mod config;
pub mod console;
pub mod error;
pub mod qemu;
pub mod script;
pub mod session;

// Re-export commonly used items
pub use config::Config;
pub use console::Console;
pub use error::ProvisionError;
pub use qemu::{create_scratch_disk, preflight, QemuBuilder, VmProcess, SHARE_TAG};
pub use script::{provisioning_script, run_script, Step};
pub use session::Session;
