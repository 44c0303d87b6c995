//! Gateway driver: feeds problems to the responder and records outcomes.
//!
//! Linear state machine per run:
//! `INIT → CONNECTING → SERVING problem[0..n] → FINALIZING → DONE`, with
//! `FAILED` reachable from CONNECTING (peer never became reachable) and
//! FINALIZING (submission could not be persisted). Problems are served
//! strictly one at a time; the result set always carries exactly one row
//! per input problem id, in input order, whatever happened to the calls.

use crate::config::{GatewayConfig, RelayConfig};
use crate::dataset::{clamp_answer, validate_submission, write_submission, Problem, SubmissionRow};
use crate::ordering::OrderingPolicy;
use crate::relay::RelayClient;
use crate::{HarnessError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Request payload for the `predict` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub id: String,
    pub problem: String,
}

/// Response payload from the `predict` endpoint. The raw answer is an
/// unconstrained integer; the gateway clamps it into range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub answer: i64,
}

/// Terminal status of one predict call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ok,
    Timeout,
    HandlerError,
    TransportError,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallStatus::Ok => "ok",
            CallStatus::Timeout => "timeout",
            CallStatus::HandlerError => "handler_error",
            CallStatus::TransportError => "transport_error",
        };
        write!(f, "{}", s)
    }
}

/// Per-problem bookkeeping entry. Append-only; finalized when the call
/// resolves and never revisited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub problem_id: String,
    pub started_at: DateTime<Utc>,
    pub deadline: Duration,
    pub status: CallStatus,
    pub answer: Option<u32>,
    pub raw_error: Option<String>,
    pub elapsed: Duration,
}

/// Everything a run produced, for diagnostics beyond the submission file.
#[derive(Debug)]
pub struct RunReport {
    /// Call records in evaluation (serving) order.
    pub records: Vec<CallRecord>,
    /// Submission rows in original input order.
    pub rows: Vec<SubmissionRow>,
}

impl RunReport {
    pub fn solved(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == CallStatus::Ok)
            .count()
    }
}

/// Gateway run configuration.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub relay_addr: String,
    pub ordering: OrderingPolicy,
    /// Per-problem wall-clock deadline.
    pub deadline: Duration,
    /// Startup grace period for the initial connection.
    pub connect_grace: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            relay_addr: RelayConfig::DEFAULT_ADDR.to_string(),
            ordering: OrderingPolicy::Random,
            deadline: GatewayConfig::DEFAULT_DEADLINE,
            connect_grace: RelayConfig::CONNECT_GRACE_PERIOD,
        }
    }
}

/// The driver owning the problem sequence, ordering policy and result set.
pub struct Gateway {
    options: GatewayOptions,
}

impl Gateway {
    pub fn new(options: GatewayOptions) -> Self {
        Self { options }
    }

    /// Run the full evaluation: connect, serve every problem once, write
    /// the submission.
    ///
    /// Fatal errors (responder never reachable, submission write failure)
    /// propagate as `Err` and leave no submission file; per-problem
    /// failures are recorded and defaulted, never retried.
    pub async fn run(&self, problems: &[Problem], output_path: &Path) -> Result<RunReport> {
        // INIT: evaluation order is fixed once, before any call.
        let order = self.options.ordering.evaluation_order(problems.len());
        info!(
            "evaluating {} problems over relay {}",
            problems.len(),
            self.options.relay_addr
        );

        // CONNECTING: fatal on failure, no partial submission is produced.
        let client =
            RelayClient::connect(self.options.relay_addr.clone(), self.options.connect_grace)
                .await?;

        // SERVING: one problem at a time, in evaluation order.
        let mut answers: Vec<Option<u32>> = vec![None; problems.len()];
        let mut records = Vec::with_capacity(problems.len());
        let mut transport_dead = false;

        for (served, &idx) in order.iter().enumerate() {
            let problem = &problems[idx];

            if transport_dead {
                // Cannot continue without a channel; remaining problems get
                // the default answer but still appear in the bookkeeping.
                records.push(CallRecord {
                    problem_id: problem.id.clone(),
                    started_at: Utc::now(),
                    deadline: self.options.deadline,
                    status: CallStatus::TransportError,
                    answer: None,
                    raw_error: Some("transport broken before call".to_string()),
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            let record = self
                .serve_one(&client, problem, served, problems.len())
                .await;

            if record.status == CallStatus::TransportError {
                transport_dead = true;
            }
            answers[idx] = record.answer;
            records.push(record);
        }

        client.close().await;

        // FINALIZING: one row per problem, original input order, defaults
        // for anything unresolved.
        let rows: Vec<SubmissionRow> = problems
            .iter()
            .zip(&answers)
            .map(|(problem, answer)| SubmissionRow {
                id: problem.id.clone(),
                answer: answer.unwrap_or(GatewayConfig::DEFAULT_ANSWER),
            })
            .collect();

        validate_submission(&rows, problems)?;
        write_submission(output_path, &rows).map_err(|e| {
            error!("submission persistence failed: {}", e);
            e
        })?;

        let report = RunReport { records, rows };
        info!(
            "run complete: {}/{} answered ok",
            report.solved(),
            problems.len()
        );
        Ok(report)
    }

    /// Issue one predict call and finalize its record.
    async fn serve_one(
        &self,
        client: &RelayClient,
        problem: &Problem,
        served: usize,
        total: usize,
    ) -> CallRecord {
        let request = PredictRequest {
            id: problem.id.clone(),
            problem: problem.problem.clone(),
        };
        let started_at = Utc::now();
        let start = Instant::now();

        debug!("serving {} ({}/{})", problem.id, served + 1, total);

        let outcome = client
            .call_typed::<PredictRequest, PredictResponse>(
                GatewayConfig::PREDICT_ENDPOINT,
                &request,
                self.options.deadline,
            )
            .await;

        let elapsed = start.elapsed();

        let (status, answer, raw_error) = match outcome {
            Ok(response) => {
                let clamped = clamp_answer(response.answer);
                if i64::from(clamped) != response.answer {
                    warn!(
                        "answer {} for {} clamped to {}",
                        response.answer, problem.id, clamped
                    );
                }
                (CallStatus::Ok, Some(clamped), None)
            }
            Err(e @ HarnessError::Timeout { .. }) => {
                warn!("{} timed out after {:?}", problem.id, elapsed);
                (CallStatus::Timeout, None, Some(e.to_string()))
            }
            Err(e @ HarnessError::HandlerFailure { .. }) => {
                warn!("{} failed in handler: {}", problem.id, e);
                (CallStatus::HandlerError, None, Some(e.to_string()))
            }
            Err(e @ HarnessError::CorruptEnvelope { .. }) => {
                // The reply arrived; only its payload was unusable. Charged
                // to the handler, not the channel.
                warn!("{} returned an undecodable answer: {}", problem.id, e);
                (CallStatus::HandlerError, None, Some(e.to_string()))
            }
            Err(e) => {
                // Everything else (broken transport, corrupt envelope,
                // failed re-dial) means the channel cannot be trusted.
                error!("transport failure on {}: {}", problem.id, e);
                (CallStatus::TransportError, None, Some(e.to_string()))
            }
        };

        CallRecord {
            problem_id: problem.id.clone(),
            started_at,
            deadline: self.options.deadline,
            status,
            answer,
            raw_error,
            elapsed,
        }
    }
}
