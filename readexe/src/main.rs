mod diag;
mod report;


use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;

use clap::Parser;
use exehdr::ByteSource;
use exehdr::cascade::{self, Options, Outcome};
use exehdr::ne::WalkOptions;
use tracing::debug;
use tracing_subscriber::EnvFilter;


/// Prints the headers of DOS, NE, LE/LX and W3 executables.
#[derive(Parser)]
#[command(version)]
struct Opts {
    /// The executable to inspect.
    pub input_file: PathBuf,

    /// Decode the secondary header at this offset (decimal or 0x-prefixed hex) instead of the one
    /// named by the MZ header.
    #[arg(long, value_parser = parse_offset)]
    pub offset: Option<u64>,

    /// Do not walk the per-segment relocation tables of NE executables.
    #[arg(long)]
    pub no_relocations: bool,

    /// Also print the full decoded record tree.
    #[arg(long)]
    pub dump: bool,
}


fn parse_offset(value: &str) -> Result<u64, String> {
    let trimmed = value.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|e| format!("invalid offset {:?}: {}", value, e))
}


fn main() {
    diag::set_program_name(std::env::args_os().next().as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let opts = Opts::parse();
    let file_name = opts.input_file.display().to_string();

    let file = match File::open(&opts.input_file) {
        Ok(f) => f,
        Err(e) => diag::fail(1, &format!("Cannot open {}: {}", file_name, e)),
    };
    let mut source = match ByteSource::new(BufReader::new(file)) {
        Ok(s) => s,
        Err(e) => diag::fail(1, &report::failure_message(&file_name, &e)),
    };
    debug!("{} is {} bytes long", file_name, source.len());

    let options = Options {
        next_header_override: opts.offset,
        walk: WalkOptions {
            relocations: !opts.no_relocations,
        },
    };
    let decoded = cascade::decode(&mut source, &options);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let warnings = match report::write_report(&mut out, &file_name, &decoded) {
        Ok(w) => w,
        Err(e) => diag::fail(1, &format!("Cannot write report: {}", e)),
    };
    if opts.dump {
        if let Err(e) = writeln!(out, "{:#?}", decoded) {
            diag::fail(1, &format!("Cannot write report: {}", e));
        }
    }
    if let Err(e) = out.flush() {
        diag::fail(1, &format!("Cannot write report: {}", e));
    }

    for warning in &warnings {
        diag::warn(warning);
    }
    if let Outcome::Failed(e) = &decoded.outcome {
        diag::fail(1, &report::failure_message(&file_name, e));
    }
}
