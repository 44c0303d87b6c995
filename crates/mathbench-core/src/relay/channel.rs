//! Gateway-side relay channel.
//!
//! Dials the responder over loopback TCP and exposes a blocking-style
//! `call()`: send one request envelope, await the matching response. The
//! two processes are launched independently, so the initial dial retries
//! with bounded exponential backoff until a startup grace period expires.
//!
//! # Thread Safety
//!
//! The stream sits behind a tokio `Mutex`, serializing calls; the harness
//! only ever issues one call at a time anyway (problems are strictly
//! sequential).

use super::envelope::{read_envelope, write_envelope, Envelope};
use crate::config::RelayConfig;
use crate::{HarnessError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Client end of the relay channel.
pub struct RelayClient {
    addr: String,
    /// `None` after a timed-out or broken call; the next call re-dials.
    stream: Mutex<Option<TcpStream>>,
    next_id: AtomicU64,
}

impl RelayClient {
    /// Connect to the responder, retrying with bounded exponential backoff
    /// for the given startup grace period.
    ///
    /// After the grace period expires without a successful dial, returns
    /// `ConnectionUnavailable`; connection failure at this stage is fatal
    /// for the run.
    pub async fn connect(addr: impl Into<String>, grace: Duration) -> Result<Self> {
        let addr = addr.into();
        let stream = dial_with_backoff(&addr, grace).await?;

        debug!("relay client connected to {}", addr);

        Ok(Self {
            addr,
            stream: Mutex::new(Some(stream)),
            next_id: AtomicU64::new(1),
        })
    }

    /// Invoke an endpoint with an opaque payload and await the response.
    ///
    /// Blocks the calling task until the matching response envelope
    /// arrives, the peer sends an error envelope (`HandlerFailure`), the
    /// deadline elapses (`Timeout`), or the connection breaks
    /// (`TransportBroken`). A timeout fails only this call: the connection
    /// is dropped so any late response dies with the old socket, and the
    /// next call re-dials.
    pub async fn call(
        &self,
        endpoint: &str,
        payload: Vec<u8>,
        deadline: Duration,
    ) -> Result<Vec<u8>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Envelope {
            endpoint: endpoint.to_string(),
            payload,
            is_error: false,
            id,
        };

        let mut guard = self.stream.lock().await;

        // Re-dial lazily after a previous timeout or break. The peer was
        // alive recently, so the reconnect window is short.
        let stream = match guard.take() {
            Some(stream) => stream,
            None => {
                debug!("re-dialing {} after poisoned connection", self.addr);
                dial_with_backoff(&self.addr, RelayConfig::RECONNECT_GRACE_PERIOD).await?
            }
        };
        // Scope the stream borrow so the failure arms below can poison it.
        let outcome = {
            let stream = guard.insert(stream);
            let exchange = async {
                let (mut reader, mut writer) = stream.split();
                write_envelope(&mut writer, &request).await?;

                loop {
                    match read_envelope(&mut reader).await? {
                        Some(envelope) if envelope.id == id => return Ok(envelope),
                        Some(stale) => {
                            // Response to an earlier timed-out call that
                            // raced the reconnect; drop it and keep waiting.
                            debug!(
                                "discarding stale envelope id={} for '{}'",
                                stale.id, stale.endpoint
                            );
                        }
                        None => {
                            return Err(HarnessError::TransportBroken {
                                message: "peer closed connection mid-call".to_string(),
                            })
                        }
                    }
                }
            };
            tokio::time::timeout(deadline, exchange).await
        };

        match outcome {
            Ok(Ok(envelope)) => {
                if envelope.is_error {
                    let wire = envelope.decode_error();
                    Err(HarnessError::HandlerFailure {
                        endpoint: endpoint.to_string(),
                        message: format!("({}) {}", wire.code, wire.message),
                    })
                } else {
                    Ok(envelope.payload)
                }
            }
            Ok(Err(e)) => {
                // Transport-level failure; connection is unusable.
                *guard = None;
                Err(match e {
                    HarnessError::TransportBroken { .. } | HarnessError::CorruptEnvelope { .. } => e,
                    HarnessError::Io { message, .. } => {
                        HarnessError::TransportBroken { message }
                    }
                    other => other,
                })
            }
            Err(_) => {
                // Deadline elapsed. Drop the connection: the response may
                // still arrive, and it must be discarded, not delivered to
                // the next call.
                warn!("call to '{}' timed out after {:?}", endpoint, deadline);
                *guard = None;
                Err(HarnessError::Timeout {
                    endpoint: endpoint.to_string(),
                    deadline,
                })
            }
        }
    }

    /// Typed convenience over [`call`](Self::call): serialize the request,
    /// deserialize the response with the endpoint's own types.
    pub async fn call_typed<Req, Resp>(
        &self,
        endpoint: &str,
        request: &Req,
        deadline: Duration,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)?;
        let response = self.call(endpoint, payload, deadline).await?;
        serde_json::from_slice(&response).map_err(|e| HarnessError::CorruptEnvelope {
            message: format!("response for '{}' did not decode: {}", endpoint, e),
        })
    }

    /// Address this client dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Release the connection.
    pub async fn close(&self) {
        let mut guard = self.stream.lock().await;
        *guard = None;
    }
}

/// Dial `addr`, retrying with bounded exponential backoff until `grace`
/// elapses. Schedule: 100 ms initial, doubling, capped at 5 s.
async fn dial_with_backoff(addr: &str, grace: Duration) -> Result<TcpStream> {
    let start = Instant::now();
    let mut backoff = RelayConfig::CONNECT_INITIAL_BACKOFF;

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                if start.elapsed() + backoff >= grace {
                    return Err(HarnessError::ConnectionUnavailable {
                        addr: addr.to_string(),
                        grace,
                    });
                }
                debug!("dial {} failed ({}), retrying in {:?}", addr, e, backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RelayConfig::CONNECT_MAX_BACKOFF);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::responder::Responder;

    async fn echo_responder() -> (crate::relay::responder::ResponderHandle, String) {
        let mut responder = Responder::new();
        responder.register("echo", |payload: serde_json::Value| async move {
            Ok::<_, HarnessError>(payload)
        });
        responder.register("fail", |_payload: serde_json::Value| async move {
            Err::<serde_json::Value, _>(HarnessError::HandlerFailure {
                endpoint: "fail".into(),
                message: "test failure".into(),
            })
        });
        responder.register("slow", |payload: serde_json::Value| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, HarnessError>(payload)
        });
        let handle = responder.serve("127.0.0.1:0").await.unwrap();
        let addr = handle.addr().to_string();
        (handle, addr)
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let (_handle, addr) = echo_responder().await;
        let client = RelayClient::connect(addr, Duration::from_secs(5))
            .await
            .unwrap();

        let result: serde_json::Value = client
            .call_typed("echo", &serde_json::json!({"x": 1}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_handler_error_surfaces_as_handler_failure() {
        let (_handle, addr) = echo_responder().await;
        let client = RelayClient::connect(addr, Duration::from_secs(5))
            .await
            .unwrap();

        let result = client
            .call("fail", b"{}".to_vec(), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(HarnessError::HandlerFailure { .. })));
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_error_envelope_not_break() {
        let (_handle, addr) = echo_responder().await;
        let client = RelayClient::connect(addr, Duration::from_secs(5))
            .await
            .unwrap();

        let result = client
            .call("nonexistent", b"{}".to_vec(), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(HarnessError::HandlerFailure { .. })));

        // Channel is still usable afterwards.
        let ok: serde_json::Value = client
            .call_typed("echo", &serde_json::json!(1), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ok, serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_timeout_fails_call_not_channel() {
        let (_handle, addr) = echo_responder().await;
        let client = RelayClient::connect(addr, Duration::from_secs(5))
            .await
            .unwrap();

        let result = client
            .call("slow", b"{}".to_vec(), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(HarnessError::Timeout { .. })));

        // Next call re-dials and succeeds; the late "slow" response died
        // with the old socket.
        let ok: serde_json::Value = client
            .call_typed("echo", &serde_json::json!("next"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ok, serde_json::json!("next"));
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_grace() {
        // Nothing listens on this port.
        let result = RelayClient::connect("127.0.0.1:1", Duration::from_millis(200)).await;
        assert!(matches!(
            result,
            Err(HarnessError::ConnectionUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_waits_for_late_listener() {
        // Reserve a port, start listening only after a delay.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let addr_clone = addr.clone();
        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let mut responder = Responder::new();
            responder.register("echo", |payload: serde_json::Value| async move {
                Ok::<_, HarnessError>(payload)
            });
            responder.serve(addr_clone.as_str()).await.unwrap()
        });

        let client = RelayClient::connect(addr, Duration::from_secs(10))
            .await
            .unwrap();
        let ok: serde_json::Value = client
            .call_typed("echo", &serde_json::json!("late"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ok, serde_json::json!("late"));

        let _handle = server.await.unwrap();
    }
}
