use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};
use memmap2::Mmap;

use lox_engine::ast_printer::AstPrinter;
use lox_engine::Lox;

/// Exit status for a script that could not be read.
const EXIT_IO: i32 = 74;

#[derive(ClapParser, Debug)]
#[command(version, about = "Lox language interpreter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,

    /// Enable logging to the log file
    #[arg(long, global = true)]
    log: bool,

    /// File that --log writes to
    #[arg(long, global = true, default_value = "lox.log")]
    log_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs each file as a Lox program in its own session
    Run {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Parses a file and prints its syntax tree
    Parse {
        file: PathBuf,

        /// Print the tree as JSON instead of s-expressions
        #[arg(long)]
        json: bool,
    },
}

/// Reads a script through a read-only memory map.
fn read_file(filename: &Path) -> Result<String> {
    info!("Reading file: {:?}", filename);

    let file = File::open(filename).with_context(|| format!("Failed to open file {:?}", filename))?;
    let len = file
        .metadata()
        .with_context(|| format!("Failed to stat file {:?}", filename))?
        .len();

    // Mapping a zero-length file fails on some platforms.
    if len == 0 {
        return Ok(String::new());
    }

    // SAFETY: the map is read once, copied out, and dropped before return.
    let map = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to map file {:?}", filename))?;

    let source = String::from_utf8(map.to_vec())
        .with_context(|| format!("File {:?} is not valid UTF-8", filename))?;

    info!("Read {} bytes from {:?}", len, filename);

    Ok(source)
}

fn init_logger(path: &Path) -> Result<()> {
    let log_file =
        File::create(path).with_context(|| format!("Failed to create {:?}", path))?;

    Builder::new()
        .format(|buf, record| {
            let module = record.module_path().unwrap_or("<unnamed>");
            let module = module.strip_prefix("lox_engine::").unwrap_or(module);
            writeln!(
                buf,
                "[{} {}:{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                module,
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter_level(log::LevelFilter::Debug) // RUST_LOG overrides
        .parse_default_env()
        .init();

    info!("Logger initialized, writing to {:?}", path);
    Ok(())
}

/// Runs every script, reporting failures as they happen.  Returns the exit
/// code of the first failing script.
fn run_scripts(files: &[PathBuf]) -> Option<i32> {
    let mut first_failure = None;

    for path in files {
        info!("Running {:?}", path);

        let code = match read_file(path) {
            Ok(source) => match Lox::new().run(&source) {
                Ok(()) => {
                    info!("{:?} completed", path);
                    continue;
                }
                Err(e) => {
                    debug!("{:?} failed: {:?}", path, e);
                    eprintln!("{}", e);
                    e.exit_code()
                }
            },
            Err(e) => {
                eprintln!("{:#}", e);
                EXIT_IO
            }
        };

        first_failure.get_or_insert(code);
    }

    first_failure
}

fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    if args.log {
        init_logger(&args.log_file)?;
    } else {
        Builder::new().filter_level(log::LevelFilter::Off).init();
    }

    info!("CLI arguments: {:?}", args);

    match args.commands {
        Commands::Run { files } => {
            if let Some(code) = run_scripts(&files) {
                debug!("Exiting with code {}", code);
                std::process::exit(code);
            }
        }

        Commands::Parse { file, json } => {
            let source = match read_file(&file) {
                Ok(source) => source,
                Err(e) => {
                    eprintln!("{:#}", e);
                    std::process::exit(EXIT_IO);
                }
            };

            match lox_engine::parse(&source) {
                Ok(statements) => {
                    if json {
                        let dump = serde_json::to_string_pretty(&statements)
                            .context("Failed to serialize syntax tree")?;
                        println!("{}", dump);
                    } else {
                        println!("{}", AstPrinter::program(&statements));
                    }
                }
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(e.exit_code());
                }
            }
        }
    }

    Ok(())
}
