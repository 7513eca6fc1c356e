//! `kestrel` — command-line interface for Kestrel SDR motherboards.
//!
//! ```text
//! USAGE:
//!   kestrel probe                     Read FPGA identity without bring-up
//!   kestrel bringup [-o k=v ...]      Run full bring-up and report state
//!   kestrel clock <source>            Switch the reference clock source
//!   kestrel time <source>             Switch the time source
//!   kestrel sensors                   Print board sensor readings
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kestrel_driver::{
    Board, ClockSource, InitState, MbRegs, TimeSource, UioRegisters, MBOARD_REGS_LABEL,
};

#[derive(Parser)]
#[command(name = "kestrel", about = "Kestrel SDR motherboard CLI", version)]
struct Cli {
    /// Board hardware revision (from the EEPROM label).
    #[arg(long, default_value_t = 3)]
    hw_rev: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Read FPGA identity registers without running bring-up.
    Probe,
    /// Run full bring-up and report the resulting state.
    Bringup {
        /// Device options as `key=value` (e.g. `-o clock_source=gpsdo`).
        #[arg(short, long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },
    /// Switch the reference clock source.
    Clock {
        /// One of `internal`, `external`, `gpsdo`.
        source: String,
    },
    /// Switch the time source.
    Time {
        /// One of `internal`, `external`, `gpsdo`.
        source: String,
    },
    /// Print board sensor readings.
    Sensors,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Probe => cmd_probe()?,
        Cmd::Bringup { options } => cmd_bringup(cli.hw_rev, &options)?,
        Cmd::Clock { source } => cmd_clock(cli.hw_rev, &source)?,
        Cmd::Time { source } => cmd_time(cli.hw_rev, &source)?,
        Cmd::Sensors => cmd_sensors(cli.hw_rev)?,
    }

    Ok(())
}

fn parse_options(options: &[String]) -> Result<std::collections::HashMap<String, String>> {
    let mut map = std::collections::HashMap::new();
    for opt in options {
        let Some((key, value)) = opt.split_once('=') else {
            bail!("option `{opt}' is not of the form key=value");
        };
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

fn cmd_probe() -> Result<()> {
    let regs = MbRegs::new(Box::new(UioRegisters::open(MBOARD_REGS_LABEL)?));

    let (major, minor) = regs.compat_number()?;
    let (exp_major, exp_minor) = kestrel_regs::regs::EXPECTED_COMPAT;
    println!("FPGA compat:    {major}.{minor} (software expects {exp_major}.{exp_minor})");

    let (hash, dirty) = regs.git_hash()?;
    println!(
        "FPGA git hash:  {hash:07x} ({})",
        if dirty { "dirty" } else { "clean" }
    );

    match regs.build_timestamp()? {
        Some(stamp) => println!("FPGA built:     {stamp}"),
        None => println!("FPGA built:     (no datestamp capability)"),
    }

    let (link0, link1, variant) = regs.board_variant()?;
    println!("Uplink ports:   ({}, {})", link0.label(), link1.label());
    println!("Board variant:  {}", variant.label());

    Ok(())
}

fn cmd_bringup(hw_rev: u8, options: &[String]) -> Result<()> {
    let opts = parse_options(options)?;
    let board = Board::discover(hw_rev, &opts)?;

    match board.init_state() {
        InitState::Ready => {
            let info = board.device_info()?;
            println!("{} — bring-up complete", info.description);
            println!("  FPGA:      {} ({})", info.fpga_version, info.fpga_variant);
            println!("  Clock src: {}", board.clock_source().map_or("-".into(), |s| s.to_string()));
            println!("  Time src:  {}", board.time_source().map_or("-".into(), |s| s.to_string()));
            println!("  Ref clock: {} MHz", board.ref_clock_freq()? / 1e6);
        }
        state => {
            bail!(
                "bring-up failed ({state:?}): {}",
                board.init_error().unwrap_or("unknown reason")
            );
        }
    }
    Ok(())
}

fn cmd_clock(hw_rev: u8, source: &str) -> Result<()> {
    let source: ClockSource = source.parse()?;
    let mut board = Board::discover(hw_rev, &std::collections::HashMap::new())?;
    board.set_clock_source(source)?;
    println!(
        "clock source = {source}, ref clock = {} MHz",
        board.ref_clock_freq()? / 1e6
    );
    Ok(())
}

fn cmd_time(hw_rev: u8, source: &str) -> Result<()> {
    let source: TimeSource = source.parse()?;
    let mut board = Board::discover(hw_rev, &std::collections::HashMap::new())?;
    board.set_time_source(source)?;
    println!("time source = {source}");
    Ok(())
}

fn cmd_sensors(hw_rev: u8) -> Result<()> {
    let mut board = Board::discover(hw_rev, &std::collections::HashMap::new())?;

    for sensor in [
        board.ref_lock_sensor(),
        board.gps_lock_sensor()?,
        board.temp_sensor(),
        board.fan_sensor(),
    ] {
        println!("{:<12} {:>8} {}", sensor.name, sensor.value, sensor.unit);
    }

    match board.gps_time_sensor() {
        Ok(sensor) => println!("{:<12} {:>8} {}", sensor.name, sensor.value, sensor.unit),
        Err(e) => println!("gps_time     unavailable: {e}"),
    }

    Ok(())
}
