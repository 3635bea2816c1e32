//! CLI tool for ragzip compression and decompression.

mod commands;
mod exit_codes;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Random-access gzip tool
#[derive(Parser)]
#[command(name = "ragzip")]
#[command(author, version, about = "Random-access gzip tool", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v progress and cache events, -vv tracing)
    #[arg(short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file or stdin to ragzip format (single threaded)
    Encode {
        /// Input file to compress (stdin when absent)
        #[arg(short = 'i', long = "input")]
        input: Option<PathBuf>,

        /// Output file (default: input + ".gz"; "-" for stdout)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Page size exponent for power of 2
        #[arg(short = 'P', long = "page-exponent", default_value_t = 13)]
        page_exponent: u8,

        /// Index size exponent for power of 2
        #[arg(short = 'I', long = "index-exponent", default_value_t = 12)]
        index_exponent: u8,

        /// Replace the output file if it exists
        #[arg(long)]
        clobber: bool,
    },

    /// Decompress a gzip or ragzip file or stdin (single threaded)
    Decode {
        /// Input file to decompress, must have a .gz or .rgz extension
        /// (stdin when absent)
        #[arg(short = 'i', long = "input")]
        input: Option<PathBuf>,

        /// Output file (default: input minus its extension; "-" for stdout)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Print the ragzip footer specs and extensions, then exit
        #[arg(short = 's', long = "specs")]
        specs: bool,

        /// Replace the output file if it exists
        #[arg(long)]
        clobber: bool,
    },

    /// Compress a file to ragzip format using all cores
    Pencode {
        /// Input file to compress
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Output file (default: input + ".gz")
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Page size exponent for power of 2 (at most 21 in parallel mode)
        #[arg(short = 'P', long = "page-exponent", default_value_t = 13)]
        page_exponent: u8,

        /// Index size exponent for power of 2
        #[arg(short = 'I', long = "index-exponent", default_value_t = 12)]
        index_exponent: u8,

        /// Number of compression threads (0 = one per core)
        #[arg(short = 't', long, default_value_t = 0)]
        threads: usize,

        /// Replace the output file if it exists
        #[arg(long)]
        clobber: bool,
    },

    /// Decompress a ragzip file using all cores
    Pdecode {
        /// Input file to decompress, must have a .gz or .rgz extension
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Output file (default: input minus its extension)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Number of inflate threads (0 = one per core)
        #[arg(short = 't', long, default_value_t = 0)]
        threads: usize,

        /// Replace the output file if it exists
        #[arg(long)]
        clobber: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // -h and -V land here too and are not argument errors.
            let is_usage_error = err.use_stderr();
            let _ = err.print();
            std::process::exit(if is_usage_error {
                exit_codes::BAD_ARGS
            } else {
                exit_codes::SUCCESS
            });
        }
    };
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Encode {
            input,
            output,
            page_exponent,
            index_exponent,
            clobber,
        } => commands::encode(input, output, page_exponent, index_exponent, clobber),
        Commands::Decode {
            input,
            output,
            specs,
            clobber,
        } => commands::decode(input, output, specs, clobber),
        Commands::Pencode {
            input,
            output,
            page_exponent,
            index_exponent,
            threads,
            clobber,
        } => commands::pencode(input, output, page_exponent, index_exponent, threads, clobber),
        Commands::Pdecode {
            input,
            output,
            threads,
            clobber,
        } => commands::pdecode(input, output, threads, clobber),
    };

    if let Err(err) = result {
        eprintln!("ragzip: {err}");
        std::process::exit(exit_codes::error_to_exit_code(&err));
    }
}
