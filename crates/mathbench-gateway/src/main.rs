//! Mathbench gateway - drives a solver process through a problem set.
//!
//! Loads the test CSV, connects to the solver's responder over the local
//! relay, serves every problem once with a per-problem deadline, and
//! writes the submission CSV. Exits 0 when the run completes (even with
//! per-problem failures, which are defaulted) and non-zero when the run
//! itself fails (solver never reachable, submission not writable).

use anyhow::Result;
use clap::Parser;
use mathbench_core::config::relay_addr_from_env;
use mathbench_core::dataset;
use mathbench_core::gateway::{Gateway, GatewayOptions};
use mathbench_core::ordering::OrderingPolicy;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "mathbench-gateway")]
#[command(about = "Evaluation gateway for the mathbench relay")]
struct Args {
    /// Problem set CSV (header: id,problem)
    #[arg(long, default_value = "test.csv")]
    test: PathBuf,

    /// Submission CSV to write (header: id,answer)
    #[arg(long, default_value = "submission.csv")]
    output: PathBuf,

    /// Relay address (defaults to MATHBENCH_RELAY_ADDR or 127.0.0.1:9090)
    #[arg(long)]
    addr: Option<String>,

    /// Use a fixed, pre-committed evaluation order with this seed instead
    /// of a fresh random permutation
    #[arg(long)]
    seed: Option<u64>,

    /// Per-problem deadline in seconds
    #[arg(long, default_value = "600")]
    deadline_secs: u64,

    /// Startup grace period for connecting to the solver, in seconds
    #[arg(long, default_value = "60")]
    grace_secs: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let options = GatewayOptions {
        relay_addr: args.addr.unwrap_or_else(relay_addr_from_env),
        ordering: match args.seed {
            Some(seed) => OrderingPolicy::FixedSeeded(seed),
            None => OrderingPolicy::Random,
        },
        deadline: Duration::from_secs(args.deadline_secs),
        connect_grace: Duration::from_secs(args.grace_secs),
    };

    info!("Starting mathbench gateway (relay {})", options.relay_addr);

    let problems = dataset::load_problems(&args.test)?;
    if problems.is_empty() {
        error!("problem set {} is empty", args.test.display());
        anyhow::bail!("empty problem set");
    }

    let report = Gateway::new(options).run(&problems, &args.output).await?;

    info!(
        "done: {}/{} problems answered, submission at {}",
        report.solved(),
        problems.len(),
        args.output.display()
    );

    Ok(())
}
