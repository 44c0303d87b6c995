//! Responder base: named endpoints served over the relay.
//!
//! The solver implementation registers handlers by endpoint name; the
//! serve loop accepts calls, dispatches by name, and converts any handler
//! failure (including a panic) into an error envelope instead of letting it
//! take the process down. One bad problem must not kill the server for the
//! remaining problems.
//!
//! # Thread Safety
//!
//! Each connection runs in its own spawned task. Handlers hold no
//! cross-call mutable state; anything shared (a loaded model) is an
//! immutable handle captured at registration time.

use super::envelope::{read_envelope, write_envelope, Envelope};
use crate::{HarnessError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// A single named endpoint: opaque payload in, opaque payload out.
#[async_trait]
pub trait EndpointHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Vec<u8>) -> Result<Vec<u8>>;
}

/// Type-erased call path for a registered closure: raw payload in, raw
/// payload out, future boxed so handlers of different concrete types can
/// share one registry.
type BoxedHandlerFn =
    Box<dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>> + Send + Sync>;

/// Adapter turning a typed async closure into an [`EndpointHandler`].
///
/// Decodes the request with the endpoint's own type, runs the closure,
/// encodes the response. This is where payload bytes stop being opaque;
/// the typed plumbing is erased at registration time.
struct FnHandler {
    func: BoxedHandlerFn,
}

#[async_trait]
impl EndpointHandler for FnHandler {
    async fn handle(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        (self.func)(payload).await
    }
}

/// Handle to a running responder. Dropping shuts it down.
pub struct ResponderHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ResponderHandle {
    /// Address the responder is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting new connections and signal active ones to close.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for ResponderHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Registry of named endpoints plus the serve loop.
#[derive(Default)]
pub struct Responder {
    handlers: HashMap<String, Arc<dyn EndpointHandler>>,
}

impl Responder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed async closure for an endpoint name. Replaces any
    /// previous handler for the same name.
    pub fn register<Req, Resp, F, Fut>(&mut self, endpoint: impl Into<String>, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        let endpoint = endpoint.into();
        let name = endpoint.clone();
        let handler = Arc::new(handler);
        let func: BoxedHandlerFn = Box::new(move |payload| {
            let handler = handler.clone();
            let name = name.clone();
            Box::pin(async move {
                let request: Req = serde_json::from_slice(&payload).map_err(|e| {
                    HarnessError::HandlerFailure {
                        endpoint: name.clone(),
                        message: format!("request payload did not decode: {}", e),
                    }
                })?;

                let response = (*handler)(request).await?;

                serde_json::to_vec(&response).map_err(|e| HarnessError::HandlerFailure {
                    endpoint: name,
                    message: format!("response did not encode: {}", e),
                })
            })
        });
        self.handlers.insert(endpoint, Arc::new(FnHandler { func }));
    }

    /// Register a raw [`EndpointHandler`] (for handlers that need to manage
    /// their own payload decoding or share a model handle across endpoints).
    pub fn register_handler(
        &mut self,
        endpoint: impl Into<String>,
        handler: Arc<dyn EndpointHandler>,
    ) {
        self.handlers.insert(endpoint.into(), handler);
    }

    /// Validate at startup that every required endpoint has a handler.
    ///
    /// A missing endpoint is a startup-time fatal error, not a runtime
    /// surprise on the first call.
    pub fn ensure_registered(&self, required: &[&str]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| !self.handlers.contains_key(*name))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Config {
                message: format!("required endpoints not registered: {}", missing.join(", ")),
            })
        }
    }

    /// Bind the listener and run the serve loop in background tasks.
    ///
    /// Returns a handle exposing the bound address (useful with port 0)
    /// and shutdown control.
    pub async fn serve<A: ToSocketAddrs>(self, addr: A) -> Result<ResponderHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!("responder listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let handlers = Arc::new(self.handlers);

        let task_handle = tokio::spawn(accept_loop(
            listener,
            handlers,
            shutdown_rx,
            conn_shutdown_rx,
        ));

        Ok(ResponderHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }
}

type HandlerMap = Arc<HashMap<String, Arc<dyn EndpointHandler>>>;

async fn accept_loop(
    listener: TcpListener,
    handlers: HandlerMap,
    mut shutdown_rx: oneshot::Receiver<()>,
    conn_shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("responder shutting down");
                break;
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        let handlers = handlers.clone();
                        let mut conn_shutdown = conn_shutdown_rx.clone();
                        tokio::spawn(async move {
                            debug!("relay connection from {}", peer_addr);
                            if let Err(e) =
                                handle_connection(stream, handlers, &mut conn_shutdown).await
                            {
                                debug!("relay connection {} ended: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("accept error: {}", e);
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    handlers: HandlerMap,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.split();

    loop {
        let envelope = tokio::select! {
            // Biased so a pending shutdown closes the connection before
            // another queued request is picked up.
            biased;
            _ = shutdown_rx.changed() => {
                return Ok(());
            }
            result = read_envelope(&mut reader) => {
                match result {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => return Ok(()), // clean disconnect
                    Err(e @ HarnessError::CorruptEnvelope { .. }) => {
                        // The frame was consumed whole, so the stream is
                        // still in sync. Cannot correlate a reply without
                        // a decoded id; best effort is an error envelope
                        // with id 0, then keep serving well-formed calls.
                        warn!("corrupt incoming envelope: {}", e);
                        let reply = Envelope::error_response("", &e, 0);
                        write_envelope(&mut writer, &reply).await?;
                        continue;
                    }
                    // An oversized frame leaves unread bytes on the wire;
                    // the connection cannot be resynchronized.
                    Err(e) => return Err(e),
                }
            }
        };

        let reply = dispatch_call(&handlers, envelope).await;
        write_envelope(&mut writer, &reply).await?;
    }
}

/// Look up the handler, invoke it, and wrap the outcome in an envelope.
///
/// The handler runs in its own task so that a panic surfaces as a
/// `JoinError` and becomes an error envelope rather than a dead server.
async fn dispatch_call(handlers: &HandlerMap, envelope: Envelope) -> Envelope {
    let Envelope {
        endpoint,
        payload,
        id,
        ..
    } = envelope;

    let handler = match handlers.get(&endpoint) {
        Some(handler) => handler.clone(),
        None => {
            let err = HarnessError::UnknownEndpoint(endpoint.clone());
            warn!("{}", err);
            return Envelope::error_response(endpoint, &err, id);
        }
    };

    let invocation = tokio::spawn(async move { handler.handle(payload).await });

    match invocation.await {
        Ok(Ok(response_payload)) => Envelope {
            endpoint,
            payload: response_payload,
            is_error: false,
            id,
        },
        Ok(Err(e)) => {
            error!("handler for '{}' failed: {}", endpoint, e);
            Envelope::error_response(endpoint, &e, id)
        }
        Err(join_err) => {
            let message = if join_err.is_panic() {
                "handler panicked".to_string()
            } else {
                format!("handler task failed: {}", join_err)
            };
            let err = HarnessError::HandlerFailure {
                endpoint: endpoint.clone(),
                message,
            };
            error!("{}", err);
            Envelope::error_response(endpoint, &err, id)
        }
    }
}
