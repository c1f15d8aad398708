//! ntfs-mount CLI - Command line interface for NTFS volume management.
//!
//! Thin front end over `ntfs-mount-core`: every command creates a context,
//! runs one engine operation and reports the outcome.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ntfs_mount_core::{Context, DiskRecord, EngineConfig, MountDriver, PrivilegeEscalation};
use ntfs_mount_core::logging;
use ntfs_mount_core::status::describe;

/// NTFS volume management tool.
#[derive(Parser)]
#[command(name = "ntfs-mount")]
#[command(version, about = "Discover, mount and unmount NTFS volumes", long_about = None)]
struct Cli {
    /// JSON configuration file (defaults to $NTFS_MOUNT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// NTFS driver to use: ntfs3 or ntfs-3g
    #[arg(long, global = true)]
    driver: Option<MountDriver>,

    /// Run mount commands through sudo
    #[arg(long, global = true)]
    sudo: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List NTFS volumes
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the status of one device
    Status {
        /// Device path (e.g., /dev/sdb1)
        device: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Mount an NTFS volume
    Mount {
        /// Device path (e.g., /dev/sdb1)
        device: String,

        /// Existing empty directory to mount on
        mount_point: String,

        /// Enable read-write mode
        #[arg(short = 'w', long)]
        read_write: bool,
    },

    /// Unmount an NTFS volume, including one mounted by an earlier run
    Unmount {
        /// Mount point
        mount_point: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging_with(if cli.verbose {
        "ntfs_mount=debug"
    } else {
        "ntfs_mount=warn"
    });

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", describe(&e));
            return ExitCode::FAILURE;
        }
    };

    let mut ctx = Context::with_config(config);
    tracing::debug!(config = ?ctx.config(), "context ready");
    let code = match run(&mut ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = ctx.last_error();
            if message.is_empty() {
                eprintln!("Error: {}", describe(&e));
            } else {
                eprintln!("Error: {}", message);
            }
            ExitCode::FAILURE
        }
    };
    ctx.destroy();
    code
}

fn load_config(cli: &Cli) -> ntfs_mount_core::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };
    if let Some(driver) = cli.driver {
        config = config.with_driver(driver);
    }
    if cli.sudo {
        config = config.with_escalation(PrivilegeEscalation::Sudo);
    }
    Ok(config)
}

fn run(ctx: &mut Context, command: Commands) -> ntfs_mount_core::Result<()> {
    match command {
        Commands::List { json } => {
            let disks = ctx.scan_disks()?;
            if json {
                print_json(&disks);
            } else if disks.is_empty() {
                println!("No NTFS volumes found.");
            } else {
                print_table(&disks);
            }
        }
        Commands::Status { device, json } => {
            let disk = ctx.get_status(&device)?;
            if json {
                print_json(&disk);
            } else {
                print_table(std::slice::from_ref(&disk));
            }
        }
        Commands::Mount {
            device,
            mount_point,
            read_write,
        } => {
            ctx.mount(&device, &mount_point, read_write)?;
            let mode = if read_write { "read-write" } else { "read-only" };
            println!("Mounted {} at {} ({})", device, mount_point, mode);
        }
        Commands::Unmount { mount_point } => {
            // Each run is a fresh context, so take over the existing mount first.
            ctx.adopt(&mount_point)?;
            ctx.unmount(&mount_point)?;
            println!("Unmounted {}", mount_point);
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

fn print_table(disks: &[DiskRecord]) {
    println!(
        "{:<20} {:<24} {:<16} {:>10} {:>10}  {}",
        "DEVICE", "LABEL", "SERIAL", "SIZE", "FREE", "STATE"
    );
    for disk in disks {
        let state = match (disk.is_mounted(), disk.is_writable()) {
            (true, true) => "mounted (rw)",
            (true, false) => "mounted (ro)",
            _ => "unmounted",
        };
        let free = if disk.is_mounted() {
            format_bytes(disk.free_size())
        } else {
            "-".to_string()
        };
        println!(
            "{:<20} {:<24} {:016X} {:>10} {:>10}  {}",
            disk.device_path(),
            disk.label(),
            disk.serial_number(),
            format_bytes(disk.total_size()),
            free,
            state
        );
    }
}

/// Formats a byte count with binary units, e.g. `465.7G`.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "K", "M", "G", "T", "P"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", bytes, UNITS[0])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}
