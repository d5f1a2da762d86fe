use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::Verbosity;

mod commands;
mod error;
mod io;

use error::CliError;

#[derive(Parser, Debug)]
#[command(name = "mosaic")]
#[command(about = "Lowers Pallas TPU kernels to the Mosaic dialect", long_about = None)]
struct Args {
    #[command(flatten)]
    verbose: Verbosity,

    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Lower a kernel file to a Mosaic module
    Lower {
        /// Kernel file (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Lowering config (defaults to ./mosaic.toml when present)
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,
        /// Output file (defaults to stdout)
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,
        /// Comma separated dimension semantics, one per grid dimension
        #[arg(short, long, value_name = "SEMANTICS")]
        dimension_semantics: Option<String>,
    },

    /// Validate a kernel file without emitting IR
    Check {
        /// Kernel file (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Lowering config (defaults to ./mosaic.toml when present)
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,
        /// Comma separated dimension semantics, one per grid dimension
        #[arg(short, long, value_name = "SEMANTICS")]
        dimension_semantics: Option<String>,
    },
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Lower {
            file,
            config,
            output,
            dimension_semantics,
        } => {
            let semantics = dimension_semantics
                .as_deref()
                .map(io::parse_semantics)
                .transpose()?;
            commands::lower::handle_lower(file, config, output, semantics)
        }
        Command::Check {
            file,
            config,
            dimension_semantics,
        } => {
            let semantics = dimension_semantics
                .as_deref()
                .map(io::parse_semantics)
                .transpose()?;
            commands::check::handle_check(file, config, semantics)
        }
    }
}

fn main() -> miette::Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();
    run(args.command)?;
    Ok(())
}
