//! mathbench-core - Evaluation relay for math olympiad style competitions.
//!
//! Feeds problems from a gateway process to an independent solver process
//! one at a time over a local relay, and collects integer answers into a
//! submission file. The relay carries arbitrary typed payloads over a
//! fixed wire protocol (opaque bytes tagged with an endpoint name), so new
//! payload shapes need no new wire schema.
//!
//! # Example
//!
//! ```rust,ignore
//! use mathbench_core::gateway::{Gateway, GatewayOptions, PredictRequest, PredictResponse};
//! use mathbench_core::relay::Responder;
//!
//! // Solver side: register the predict handler and serve.
//! let mut responder = Responder::new();
//! responder.register("predict", |req: PredictRequest| async move {
//!     Ok(PredictResponse { answer: 42 })
//! });
//! responder.ensure_registered(&["predict"])?;
//! let handle = responder.serve("127.0.0.1:9090").await?;
//!
//! // Gateway side: evaluate a problem set and write the submission.
//! let problems = mathbench_core::dataset::load_problems("test.csv".as_ref())?;
//! let report = Gateway::new(GatewayOptions::default())
//!     .run(&problems, "submission.csv".as_ref())
//!     .await?;
//! ```

pub mod config;
pub mod dataset;
pub mod error;
pub mod gateway;
pub mod ordering;
pub mod relay;

// Re-export commonly used types
pub use config::{is_scored_run, relay_addr_from_env, GatewayConfig, RelayConfig};
pub use dataset::{Problem, SubmissionRow};
pub use error::{HarnessError, Result};
pub use gateway::{CallRecord, CallStatus, Gateway, GatewayOptions, RunReport};
pub use ordering::OrderingPolicy;
pub use relay::{Envelope, RelayClient, Responder, ResponderHandle};
