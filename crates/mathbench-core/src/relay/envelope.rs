//! Envelope codec and wire framing.
//!
//! The wire unit is an envelope pairing an endpoint name with an opaque
//! payload. The relay never interprets the payload; only the handler
//! registered for the endpoint does, via the typed helpers here. Frames are
//! a 4-byte big-endian length prefix followed by the UTF-8 JSON bytes of
//! the envelope:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```

use crate::config::RelayConfig;
use crate::{HarnessError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// The wire unit exchanged between gateway and responder.
///
/// `payload` is opaque bytes (JSON produced by the endpoint's own types);
/// `id` correlates a response with its request so stale responses from a
/// timed-out call can be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub endpoint: String,
    pub payload: Vec<u8>,
    pub is_error: bool,
    pub id: u64,
}

/// Structured error carried in the payload of an `is_error` envelope, so a
/// handler failure travels as data rather than as a transport fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: i32,
    pub message: String,
}

impl Envelope {
    /// Encode a typed value into a request envelope for an endpoint.
    pub fn request<T: Serialize>(endpoint: impl Into<String>, value: &T, id: u64) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.into(),
            payload: serde_json::to_vec(value)?,
            is_error: false,
            id,
        })
    }

    /// Encode a harness error into an error response envelope.
    pub fn error_response(endpoint: impl Into<String>, err: &HarnessError, id: u64) -> Self {
        let wire = WireError {
            code: err.to_wire_error_code(),
            message: err.to_string(),
        };
        // WireError serialization cannot fail: two plain fields.
        Self {
            endpoint: endpoint.into(),
            payload: serde_json::to_vec(&wire).unwrap_or_default(),
            is_error: true,
            id,
        }
    }

    /// Decode the opaque payload with the endpoint's own type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| HarnessError::CorruptEnvelope {
            message: format!("payload for '{}' did not decode: {}", self.endpoint, e),
        })
    }

    /// Decode the structured error out of an `is_error` envelope.
    pub fn decode_error(&self) -> WireError {
        serde_json::from_slice(&self.payload).unwrap_or_else(|_| WireError {
            code: -32700,
            message: "error envelope with undecodable payload".to_string(),
        })
    }

    /// Serialize this envelope to its wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize an envelope from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| HarnessError::CorruptEnvelope {
            message: format!("malformed envelope: {}", e),
        })
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed the connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > RelayConfig::MAX_FRAME_SIZE {
        return Err(HarnessError::FrameTooLarge {
            size: len,
            max: RelayConfig::MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one envelope off the wire. `None` on clean EOF.
pub async fn read_envelope<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Envelope>> {
    match read_frame(reader).await? {
        Some(bytes) => Ok(Some(Envelope::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

/// Write one envelope to the wire.
pub async fn write_envelope<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<()> {
    write_frame(writer, &envelope.to_bytes()?).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let env = Envelope::request("predict", &serde_json::json!({"id": "p1"}), 7).unwrap();
        let bytes = env.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, env);
        assert_eq!(decoded.endpoint, "predict");
        assert!(!decoded.is_error);
        assert_eq!(decoded.id, 7);
    }

    #[test]
    fn test_typed_payload_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Payload {
            id: String,
            problem: String,
        }

        let value = Payload {
            id: "p1".into(),
            problem: "What is $1+1$?".into(),
        };
        let env = Envelope::request("predict", &value, 1).unwrap();
        let back: Payload = env.decode_payload().unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_malformed_envelope_is_corrupt() {
        let result = Envelope::from_bytes(b"not json at all");
        assert!(matches!(
            result,
            Err(HarnessError::CorruptEnvelope { .. })
        ));
    }

    #[test]
    fn test_error_envelope_carries_structured_error() {
        let err = HarnessError::HandlerFailure {
            endpoint: "predict".into(),
            message: "sympy blew up".into(),
        };
        let env = Envelope::error_response("predict", &err, 3);

        assert!(env.is_error);
        let wire = env.decode_error();
        assert_eq!(wire.code, -32603);
        assert!(wire.message.contains("sympy blew up"));
    }

    #[tokio::test]
    async fn test_frame_read_write_roundtrip() {
        let payload = b"hello relay";
        let mut buf = Vec::new();

        write_frame(&mut buf, payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor).await.unwrap();
        assert_eq!(read_back, Some(payload.to_vec()));
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_frame_read_oversized_returns_error() {
        let huge_len: u32 = (RelayConfig::MAX_FRAME_SIZE + 1) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&huge_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(HarnessError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_envelope_wire_roundtrip() {
        let env = Envelope::request("predict", &42u32, 9).unwrap();
        let mut buf = Vec::new();
        write_envelope(&mut buf, &env).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let back = read_envelope(&mut cursor).await.unwrap().unwrap();
        assert_eq!(back, env);
    }
}
