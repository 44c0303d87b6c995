//! Request/response relay between the gateway and the responder.
//!
//! A fixed, pre-compiled wire protocol carries arbitrary application
//! payloads: each call is an envelope pairing an endpoint name with opaque
//! payload bytes, so new problem/answer shapes need no new wire schema.
//!
//! # Architecture
//!
//! - **Envelope**: the wire unit and its length-prefixed framing
//! - **Client**: dials the responder, issues one call at a time
//! - **Responder**: binds named endpoints to handlers, runs the serve loop

pub mod channel;
pub mod envelope;
pub mod responder;

pub use channel::RelayClient;
pub use envelope::{Envelope, WireError};
pub use responder::{EndpointHandler, Responder, ResponderHandle};
