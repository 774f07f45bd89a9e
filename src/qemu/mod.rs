//! QEMU infrastructure: command builder, preflight, and process ownership.

mod builder;
mod launcher;

pub use builder::{create_scratch_disk, QemuBuilder, SHARE_TAG};
pub use launcher::{preflight, spawn, VmProcess};
