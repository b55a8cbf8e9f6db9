//! loopcheck command line
//!
//! `run` drives a full test pass against a device, `catalog` only lists what
//! the device offers, `emulate` serves the software reference board.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::config::{Config, ReportFormat};
use crate::device::sim::reference_board;
use crate::device::DeviceServer;
use crate::host::{HostDriver, Session};
use crate::observability::telemetry::{init_tracing, init_tracing_verbose};
use crate::report::{AggregatedResult, Report};

#[derive(Parser)]
#[command(name = "loopcheck")]
#[command(about = "Hardware-in-the-loop peripheral loopback tests over UDP")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Debug logging to stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover the device, run every sub-test and write the report
    #[command(alias = "r")]
    Run {
        /// Device address (overrides host.device_addr)
        #[arg(short, long, value_name = "ADDR")]
        device: Option<IpAddr>,

        /// Repetitions per sub-test
        #[arg(short = 'n', long)]
        iterations: Option<u32>,

        /// Report format
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,

        /// Report directory
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Seed for reproducible payloads
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the device identity, catalog and group partition
    #[command(alias = "c")]
    Catalog {
        /// Device address (overrides host.device_addr)
        #[arg(short, long, value_name = "ADDR")]
        device: Option<IpAddr>,
    },

    /// Serve the emulated reference board until interrupted
    #[command(alias = "e")]
    Emulate {
        /// Local address to bind (overrides device.bind_addr)
        #[arg(long, value_name = "ADDR")]
        bind: Option<IpAddr>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        init_tracing_verbose();
    } else {
        init_tracing();
    }
    if cli.no_color || std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            device,
            iterations,
            format,
            out,
            seed,
        } => {
            if let Some(addr) = device {
                config.host.device_addr = addr;
            }
            if let Some(n) = iterations {
                config.host.iterations = n;
            }
            if let Some(format) = format {
                config.report.format = format;
            }
            if let Some(dir) = out {
                config.report.dir = dir;
            }
            if seed.is_some() {
                config.host.seed = seed;
            }
            config.validate()?;
            run_tests(&config).await
        }
        Commands::Catalog { device } => {
            if let Some(addr) = device {
                config.host.device_addr = addr;
            }
            let driver = HostDriver::new(config.host.clone(), config.ports);
            let session = driver.connect().await?;
            print_catalog(&session, &config);
            Ok(())
        }
        Commands::Emulate { bind } => {
            if let Some(addr) = bind {
                config.device.bind_addr = addr;
            }
            emulate(&config).await
        }
    }
}

async fn run_tests(config: &Config) -> Result<()> {
    println!(
        "{} Discovering device at {}:{}",
        "→".bright_cyan(),
        config.host.device_addr,
        config.ports.init_port
    );
    let driver = HostDriver::new(config.host.clone(), config.ports);
    let session = driver.connect().await?;
    print_identity(&session);
    println!(
        "{} Running {} sub-tests in {} groups, {} iterations each",
        "→".bright_cyan(),
        session.catalog.len(),
        session.groups.len(),
        config.host.iterations
    );

    let runs = driver.run_all(&session).await?;
    let report = Report::new(&session, &runs);
    print_summary(&report);

    let path = report.write(&config.report.dir, config.report.format)?;
    println!("{} Report written to {}", "✓".bright_green(), path.display());
    Ok(())
}

async fn emulate(config: &Config) -> Result<()> {
    let board = reference_board(&config.device).context("Failed to build the reference board")?;
    let server = DeviceServer::bind(board, config.ports, &config.device).await?;
    println!(
        "{} Emulating {} on {} ({} groups from port {})",
        "→".bright_cyan(),
        config.device.board_name.bright_white(),
        server.init_addr(),
        server.group_addrs().len(),
        config.ports.group_port_base
    );

    tokio::select! {
        result = server.run() => result?,
        _ = shutdown_signal() => {
            println!("\n{} Emulator stopped", "■".bright_yellow());
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
            }
            return;
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

fn print_identity(session: &Session) {
    println!(
        "{} Board {} ({})",
        "✓".bright_green(),
        session.identity.board_name().bright_white(),
        session.identity.board_id
    );
}

fn print_catalog(session: &Session, config: &Config) {
    print_identity(session);
    for plan in &session.groups {
        let port = config
            .ports
            .group_port(plan.index)
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "\n{} {} ({}, port {})",
            "group".bold(),
            plan.index,
            plan.schedule,
            port
        );
        for (offset, entry) in plan.entries(&session.catalog).iter().enumerate() {
            println!(
                "  {:>2}  {:<32} {}",
                offset,
                entry.display_name(),
                entry.criterion.to_string().dimmed()
            );
        }
    }
}

fn print_summary(report: &Report) {
    println!();
    for entry in &report.entries {
        println!("{}", summary_line(entry));
    }
    let totals = report.totals();
    println!(
        "\n{} {}/{} iterations matched, {} mismatched, {} timed out, {} routine errors, {} interrupt errors",
        "Σ".bold(),
        totals.matched,
        totals.total(),
        totals.mismatched,
        totals.timeouts,
        totals.routine_errors,
        totals.interrupt_errors
    );
}

fn summary_line(entry: &AggregatedResult) -> String {
    let fraction = format!("{}/{}", entry.counts.matched, entry.iterations);
    let fraction = if entry.counts.failures() == 0 {
        fraction.bright_green()
    } else if entry.counts.matched == 0 {
        fraction.bright_red()
    } else {
        fraction.bright_yellow()
    };
    let latency = entry
        .mean_latency
        .map(|d| format!("{:.3}ms", d.as_secs_f64() * 1000.0))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "  {:<34} {:>9}  {:>10}",
        entry.name,
        fraction,
        latency.dimmed()
    )
}
