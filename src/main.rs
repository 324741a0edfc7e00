//! Karel compiler/VM command-line front end.
//!
//! Three subcommands exercise the library without an embedding host:
//! - `check`: compile a source file and report success or the compile error.
//! - `symbols`: compile and dump the resolved symbol table.
//! - `run`: compile, load a world (or start from an empty one), and run a
//!   named symbol to completion.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use karel_runtime::{ResultCode, Vm};

#[derive(Parser)]
#[command(name = "karelc", version, about = "Karel the Robot compiler and virtual machine")]
struct Cli {
    /// Show info-level diagnostic logging.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a program and run one of its symbols against a world.
    Run {
        source: PathBuf,
        symbol: String,
        /// A 405-byte file: 400 city bytes followed by 5 Karel bytes.
        /// Defaults to an empty city with Karel at (0,0) facing north.
        #[arg(long)]
        world: Option<PathBuf>,
    },
    /// Compile a program and print its resolved symbol table.
    Symbols { source: PathBuf },
    /// Compile a program and report success or the compile error.
    Check { source: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    init_logging(if cli.verbose { LevelFilter::Info } else { LevelFilter::Warn });

    let outcome = match &cli.command {
        Commands::Run { source, symbol, world } => run_command(source, symbol, world.as_deref()),
        Commands::Symbols { source } => symbols_command(source),
        Commands::Check { source } => check_command(source),
    };

    match outcome {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(err) => {
            log::error!("{}", err);
            process::exit(1);
        }
    }
}

fn init_logging(level: LevelFilter) {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{l} {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .expect("log4rs config is well-formed");
    let _ = log4rs::init_config(config);
}

fn load_world_file(path: &Path) -> Result<([u8; 400], [u8; 5]), Box<dyn Error>> {
    let bytes = fs::read(path)?;
    if bytes.len() != 405 {
        return Err("world file must be exactly 405 bytes (400 city bytes + 5 karel bytes)".into());
    }
    let mut city = [0u8; 400];
    city.copy_from_slice(&bytes[..400]);
    let mut karel = [0u8; 5];
    karel.copy_from_slice(&bytes[400..]);
    Ok((city, karel))
}

fn run_command(source: &Path, symbol: &str, world_path: Option<&Path>) -> Result<bool, Box<dyn Error>> {
    let vm = Vm::new();
    if vm.load_file(source) != ResultCode::Success {
        eprintln!("compilation failed");
        return Ok(false);
    }

    let (city, karel) = match world_path {
        Some(path) => load_world_file(path)?,
        None => ([0u8; 400], [0u8, 0, 0, 0, 0]),
    };
    vm.load_world(&city, &karel);

    let result = vm.run_symbol(symbol);
    println!("{:?}", result);
    Ok(result == ResultCode::Success)
}

fn symbols_command(source: &Path) -> Result<bool, Box<dyn Error>> {
    let vm = Vm::new();
    if vm.load_file(source) != ResultCode::Success {
        eprintln!("compilation failed");
        return Ok(false);
    }
    for (name, addr) in vm.dump_loaded_symbols() {
        println!("{:>6}  {}", addr, name);
    }
    Ok(true)
}

fn check_command(source: &Path) -> Result<bool, Box<dyn Error>> {
    let vm = Vm::new();
    let result = vm.load_file(source);
    println!("{:?}", result);
    Ok(result == ResultCode::Success)
}
