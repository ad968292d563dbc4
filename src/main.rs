use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use cachesim_cc::{utils, ProtocolKind, System, SystemConfig};
use clap::Parser;
use env_logger::Env;
use log::{error, info};

/// Trace-driven simulator of private caches kept coherent over a snooping bus.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// coherence protocol: mi, msi, mesi, dragon or hybrid
    #[arg(short, long)]
    protocol: Option<ProtocolKind>,

    /// system description in TOML; flags given here take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// number of cores (defaults to one per trace file)
    #[arg(short = 'n', long)]
    cores: Option<usize>,

    /// directory holding the trace files
    #[arg(long, default_value = "datasets")]
    trace_dir: PathBuf,

    /// trace name; every `<name>*.data` file in the trace directory feeds one core
    #[arg(short, long)]
    trace: String,

    /// invalidations before the hybrid protocol switches a line to updates
    #[arg(long)]
    invalid_threshold: Option<u32>,

    /// print statistics as JSON
    #[arg(long)]
    json: bool,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => SystemConfig::load(path)?,
        None => SystemConfig::default(),
    };
    if let Some(protocol) = args.protocol {
        config.protocol = protocol;
    }
    if let Some(t) = args.invalid_threshold {
        config.cache.invalid_threshold = t;
    }

    let traces = utils::read_testfiles(&args.trace_dir, &args.trace)?;
    info!("loaded {} traces for `{}`", traces.len(), args.trace);
    config.cores = args.cores.unwrap_or(traces.len());

    let system = System::new(config)?;
    let t0 = Instant::now();
    let report = system.run(traces)?;
    info!("execution time {:?}", t0.elapsed());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

fn main() -> ExitCode {
    // logging
    let env = Env::default()
        .filter_or("CACHESIM_LOG", "warn")
        .write_style_or("CACHESIM_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
