//! simbase - instruction-set simulator engine
//!
//! Host binary: loads a program image into a fresh simulation state, prints
//! what was placed where, runs the event queue and tears the state down.
//! It executes no instructions; architecture simulators embed the engine.

use anyhow::Context;
use clap::Parser;
use sim_core::{logging, Config, SimOption, SimOptions};
use sim_engine::{install_standard_modules, SimulationState};
use sim_loader::{ElfReader, ImageReader, RawReader};
use std::num::ParseIntError;
use std::path::PathBuf;

/// Command-line arguments for the simulator host.
#[derive(Parser, Debug)]
#[command(name = "simbase", author, version, about = "Instruction-set simulator engine host")]
struct Args {
    /// Configuration file (defaults to the per-user config, if any)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load PROGRAM as a raw binary at this address instead of as ELF
    #[arg(long, value_name = "ADDR", value_parser = parse_u64)]
    raw_base: Option<u64>,

    /// Advance the event queue to this time before tearing down
    #[arg(long, value_name = "TIME", value_parser = parse_u64)]
    run_until: Option<u64>,

    /// Runtime option passed to the simulation state (repeatable)
    #[arg(short, long = "option", value_name = "NAME[=VALUE]")]
    options: Vec<SimOption>,

    /// Program image followed by its own arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    program: Vec<String>,
}

/// Decimal or `0x`-prefixed hexadecimal number
fn parse_u64(text: &str) -> Result<u64, ParseIntError> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    logging::init(config.debug.log_level);

    tracing::info!("Starting simbase");

    let program = args.program.first().cloned().context("no program given")?;
    let options: SimOptions = args.options.into_iter().collect();

    let mut state = SimulationState::create(config)?;
    state.add_options(options)?;
    state.set_prog_argv(args.program)?;

    install_standard_modules(&mut state)?;
    state.init_modules()?;

    let reader: Box<dyn ImageReader> = match args.raw_base {
        Some(base) => Box::new(RawReader::new(base)),
        None => Box::new(ElfReader::new()),
    };
    state
        .load_program_file(&PathBuf::from(&program), reader.as_ref())
        .with_context(|| format!("loading {} image {}", reader.name(), program))?;

    if let Some(info) = state.program()? {
        println!("program: {} ({})", program, info.format);
        println!("entry:   0x{:x}", info.entry);
        if let Some(text) = &info.text {
            println!("text:    0x{:x}..0x{:x}", text.start, text.end);
        }
    }
    println!("regions:");
    for region in state.bus()?.regions() {
        println!(
            "  {:<12} 0x{:08x}..=0x{:08x} {}",
            region.name(),
            region.base(),
            region.last(),
            region.perms()
        );
    }

    if let Some(time) = args.run_until {
        let fired = state.advance_to(time)?;
        println!("fired {} event(s) up to t={}", fired, state.now()?);
    }

    state.check_integrity();
    let report = state.destroy()?;
    if !report.is_clean() {
        tracing::warn!("{} module(s) failed to uninstall", report.failures.len());
    }

    Ok(())
}
