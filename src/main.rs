//! Unattended VM provisioning runner CLI.
//!
//! `run` performs a full provisioning run: boot the installer, drive the
//! console script, collect artifacts, power off. `script` lists the fixed
//! steps so operators can see what the run will type.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use vm_provision::{artifact, provisioning_script, run_script, Config, Session};

#[derive(Parser)]
#[command(name = "vm-provision")]
#[command(about = "Unattended VM provisioning: installer image in, finished disk image out")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full provisioning run
    Run {
        /// TOML run configuration
        #[arg(long)]
        config: PathBuf,

        /// Override the output directory from the config
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// List the fixed provisioning steps
    Script,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output_dir } => run(&config, output_dir),
        Commands::Script => {
            list_script();
            Ok(())
        }
    }
}

fn list_script() {
    println!("{}", "Provisioning steps".bold());
    println!();
    for (i, step) in provisioning_script().iter().enumerate() {
        let timeout = step
            .timeout
            .map(|t| format!("{}s", t.as_secs()))
            .unwrap_or_else(|| "default".to_string());
        println!(
            "  {:2}. {:<18} await {:?} ({})",
            i + 1,
            step.name,
            step.expect,
            timeout
        );
    }
    println!();
}

fn run(config_path: &PathBuf, output_dir: Option<PathBuf>) -> Result<()> {
    let mut cfg = Config::load(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    if let Some(dir) = output_dir {
        cfg.output_dir = dir;
    }

    println!("{}", "VM provisioning run".bold());
    println!("  Kernel:     {}", cfg.kernel.display());
    println!("  Initrd:     {}", cfg.initrd.display());
    println!("  Installer:  {}", cfg.installer_image.display());
    println!("  Scratch:    {} GiB (preallocated)", cfg.scratch_gib);
    println!("  Share:      {}", cfg.share_dir.display());
    println!("  Output:     {}", cfg.output_dir.display());
    println!();

    eprintln!("{}", "Starting VM...".cyan());
    let mut session = Session::launch(&cfg).context("launching VM")?;
    eprintln!("{} (pid {})", "VM started".green(), session.vm_pid());

    // From here on the session's drop guarantees teardown, whatever
    // happens below.
    let steps = provisioning_script();
    let timeout = session.default_timeout();
    run_script(&mut session.console, &steps, timeout).context("provisioning script failed")?;

    session.close().context("waiting for VM exit")?;

    artifact::collect(&cfg.share_dir, &cfg.output_dir).context("collecting artifacts")?;

    println!();
    println!(
        "{} artifacts staged in {}",
        "✓".green().bold(),
        cfg.output_dir.display()
    );
    Ok(())
}
