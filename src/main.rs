use std::process::ExitCode;
use std::time::Duration;

use asynchronix::time::MonotonicTime;
use clap::Parser;
use env_logger::Env;
use log::error;

use atsim::{Platform, Report, SystemSpec};

/// Approximately-timed simulation of processors talking to memories over a bus
#[derive(Parser, Debug)]
#[command(name = "atsim")]
struct Args {
    /// Number of processors (initiators)
    #[arg(short, long, default_value = "2")]
    processors: usize,

    /// Number of memories (targets), one address region each
    #[arg(short, long, default_value = "2")]
    memories: usize,

    /// Size of each memory in bytes
    #[arg(long, default_value = "512")]
    region_size: u64,

    /// Requests issued by each processor
    #[arg(short, long, default_value = "10")]
    requests: usize,

    /// Bytes per request
    #[arg(long, default_value = "4")]
    data_len: usize,

    /// Upper bound of the random delays in ns
    #[arg(long, default_value = "1000")]
    max_delay_ns: u64,

    /// Use this delay in ns everywhere instead of random delays
    #[arg(long)]
    fixed_delay_ns: Option<u64>,

    /// Seed of every random stream
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Skip the read-back after each write
    #[arg(long)]
    no_verify: bool,

    /// Stop after this much simulated time in µs
    #[arg(long)]
    max_time_us: Option<u64>,
}

impl Args {
    fn spec(&self) -> SystemSpec {
        SystemSpec {
            processors: self.processors,
            memories: self.memories,
            region_size: self.region_size,
            requests: self.requests,
            data_len: self.data_len,
            max_delay_ns: self.max_delay_ns,
            fixed_delay_ns: self.fixed_delay_ns,
            seed: self.seed,
            verify: !self.no_verify,
        }
    }
}

fn print_report(report: &Report) {
    println!("finished simulation at {:?} after {} events", report.elapsed, report.events);
    for (i, completions) in report.completions.iter().enumerate() {
        println!("  cpu{i}: {} request(s) completed", completions.len());
    }
    println!("  address errors:      {}", report.address_errors());
    println!("  verified writes:     {}", report.verified);
    println!("  transactions:        {} allocated, {} recycled, {} live", report.allocated, report.recycled, report.live);
    println!("  open routes:         {}", report.routes);
}

fn main() -> ExitCode {
    let args = Args::parse();

    // logging
    let env = Env::default()
        .filter_or("ATSIM_LOG", "info")
        .write_style_or("ATSIM_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    let mut platform = Platform::new(args.spec());
    let result = match args.max_time_us {
        Some(us) => platform.run_until(MonotonicTime::EPOCH + Duration::from_micros(us)),
        None => platform.run(),
    };

    match result {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("simulation failed at {:?}: {}", platform.scheduler().elapsed(), e);
            ExitCode::FAILURE
        }
    }
}
