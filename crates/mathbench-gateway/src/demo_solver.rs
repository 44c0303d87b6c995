//! Demo solver - a minimal responder implementation.
//!
//! Shows the contract a real solver must honor: register a `predict`
//! handler that maps a problem statement to an integer in [0, 99999]
//! within the deadline. The solving logic here is a stand-in that answers
//! trivial `$a+b$` arithmetic and defaults to 0 for everything else.
//!
//! In a scored run (MATHBENCH_SCORED_RUN set) the process serves until
//! interrupted; otherwise it scores itself locally against a reference CSV
//! (header: id,problem,answer) and exits.

use anyhow::Result;
use clap::Parser;
use mathbench_core::config::{is_scored_run, relay_addr_from_env, GatewayConfig};
use mathbench_core::dataset::{self, clamp_answer};
use mathbench_core::gateway::{PredictRequest, PredictResponse};
use mathbench_core::relay::Responder;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "mathbench-solver")]
#[command(about = "Demo solver for the mathbench relay")]
struct Args {
    /// Relay address to listen on (defaults to MATHBENCH_RELAY_ADDR or
    /// 127.0.0.1:9090)
    #[arg(long)]
    addr: Option<String>,

    /// Reference problems CSV for local debug scoring
    #[arg(long, default_value = "reference.csv")]
    reference: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Answer trivial `$a+b$` arithmetic, 0 for anything harder.
///
/// A real submission replaces this with actual solving logic (LLM
/// prompting, symbolic math); the relay contract stays the same.
fn solve(problem: &str) -> i64 {
    let Some(start) = problem.find('$') else {
        return 0;
    };
    let rest = &problem[start + 1..];
    let Some(end) = rest.find('$') else {
        return 0;
    };
    let expr = &rest[..end];

    let mut parts = expr.splitn(2, '+');
    match (
        parts.next().map(str::trim).and_then(|s| s.parse::<i64>().ok()),
        parts.next().map(str::trim).and_then(|s| s.parse::<i64>().ok()),
    ) {
        (Some(a), Some(b)) => a + b,
        _ => 0,
    }
}

fn build_responder() -> Responder {
    let mut responder = Responder::new();
    responder.register(
        GatewayConfig::PREDICT_ENDPOINT,
        |req: PredictRequest| async move {
            let answer = i64::from(clamp_answer(solve(&req.problem)));
            info!("predict {} -> {}", req.id, answer);
            Ok::<_, mathbench_core::HarnessError>(PredictResponse { answer })
        },
    );
    responder
}

/// Score the demo solver against a reference set, without the relay.
fn run_local_debug(reference: &PathBuf) -> Result<()> {
    let problems = dataset::load_reference(reference)?;
    let total = problems.len();
    let mut correct = 0;

    for problem in &problems {
        let predicted = i64::from(clamp_answer(solve(&problem.problem)));
        let ok = predicted == problem.answer;
        if ok {
            correct += 1;
        }
        info!(
            "{} {}: predicted {}, actual {}",
            if ok { "✓" } else { "✗" },
            problem.id,
            predicted,
            problem.answer
        );
    }

    info!("score: {}/{}", correct, total);
    Ok(())
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

    if !is_scored_run() {
        info!("local debug mode: scoring against {}", args.reference.display());
        return run_local_debug(&args.reference);
    }

    let addr = args.addr.unwrap_or_else(relay_addr_from_env);
    let responder = build_responder();
    responder.ensure_registered(&[GatewayConfig::PREDICT_ENDPOINT])?;

    let mut handle = responder.serve(addr.as_str()).await?;
    info!("solver serving on {}", handle.addr());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting");
    handle.shutdown();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_simple_sum() {
        assert_eq!(solve("What is $1+1$?"), 2);
        assert_eq!(solve("What is $2+2$?"), 4);
        assert_eq!(solve("Compute $10 + 32$."), 42);
    }

    #[test]
    fn test_solve_defaults_to_zero() {
        assert_eq!(solve("Let $ABC$ be a triangle."), 0);
        assert_eq!(solve("no latex here"), 0);
        assert_eq!(solve(""), 0);
    }
}
