//! Mux-RPC: a single encrypted connection multiplexing many concurrent
//! request/reply and streaming calls.
//!
//! Wire format per frame: a 9-byte header (`flags: u8`, `body_len: u32`
//! big-endian, `req: i32` big-endian) followed by `body_len` bytes of body.
//! `req` is positive for a call the sender initiated, negative for a reply
//! to a call the *other* side initiated, and zero is illegal outside the
//! reserved all-zero header, which marks end-of-stream for a streaming
//! call. `flags` bit 3 marks the body as part of a stream (more frames for
//! this `req` follow), bit 2 marks an error/end condition, and bits 0-1
//! carry the body type (0 = binary, 1 = utf8 string, 2 = JSON).

pub mod methods;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::transport::{SecureConnection, TransportError};

pub const FLAG_STREAM: u8 = 0b1000;
pub const FLAG_END_ERR: u8 = 0b0100;
pub const BODY_TYPE_MASK: u8 = 0b0011;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    Binary,
    Utf8,
    Json,
}

impl BodyType {
    fn bits(self) -> u8 {
        match self {
            BodyType::Binary => 0,
            BodyType::Utf8 => 1,
            BodyType::Json => 2,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => BodyType::Utf8,
            2 => BodyType::Json,
            _ => BodyType::Binary,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub req: i32,
    pub stream: bool,
    pub end_or_err: bool,
    pub body_type: BodyType,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn end_of_stream_sentinel() -> Frame {
        Frame {
            req: 0,
            stream: false,
            end_or_err: false,
            body_type: BodyType::Binary,
            body: Vec::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.req == 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.stream {
            flags |= FLAG_STREAM;
        }
        if self.end_or_err {
            flags |= FLAG_END_ERR;
        }
        flags |= self.body_type.bits() & BODY_TYPE_MASK;

        let mut out = Vec::with_capacity(9 + self.body.len());
        out.push(flags);
        out.extend_from_slice(&(self.body.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.req.to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Frame, RpcError> {
        if bytes.len() < 9 {
            return Err(RpcError::Truncated);
        }
        let flags = bytes[0];
        let body_len = u32::from_be_bytes(bytes[1..5].try_into().unwrap()) as usize;
        let req = i32::from_be_bytes(bytes[5..9].try_into().unwrap());
        if bytes.len() < 9 + body_len {
            return Err(RpcError::Truncated);
        }
        Ok(Frame {
            req,
            stream: flags & FLAG_STREAM != 0,
            end_or_err: flags & FLAG_END_ERR != 0,
            body_type: BodyType::from_bits(flags & BODY_TYPE_MASK),
            body: bytes[9..9 + body_len].to_vec(),
        })
    }

    pub fn json(req: i32, stream: bool, end_or_err: bool, value: &Value) -> Frame {
        Frame {
            req,
            stream,
            end_or_err,
            body_type: BodyType::Json,
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("truncated frame")]
    Truncated,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unknown method {0}")]
    UnknownMethod(String),
    #[error("request id 0 is illegal for a non-sentinel frame")]
    IllegalRequestId,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// One open mux-RPC connection. Owns the next outgoing request id and a
/// table of channels for in-flight calls' responses.
pub struct Connection {
    conn: Mutex<SecureConnection>,
    next_req: std::sync::atomic::AtomicI32,
    pending: Mutex<HashMap<i32, mpsc::UnboundedSender<Frame>>>,
}

impl Connection {
    pub fn new(conn: SecureConnection) -> Arc<Connection> {
        Arc::new(Connection {
            conn: Mutex::new(conn),
            next_req: std::sync::atomic::AtomicI32::new(1),
            pending: Mutex::new(HashMap::new()),
        })
    }

    fn alloc_req(&self) -> i32 {
        self.next_req.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    /// Send a call and register a channel to receive its reply frame(s).
    pub async fn call(&self, name: &[&str], args: Value, streaming: bool) -> Result<mpsc::UnboundedReceiver<Frame>, RpcError> {
        let req = self.alloc_req();
        let body = serde_json::json!({ "name": name, "args": [args], "type": if streaming { "source" } else { "async" } });
        let frame = Frame::json(req, streaming, false, &body);
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().await.insert(-req, tx);
        let mut conn = self.conn.lock().await;
        conn.send_frame(&frame.encode()).await?;
        Ok(rx)
    }

    /// Drive the connection: read frames, route replies to their
    /// registered channel, and dispatch fresh incoming calls to `registry`.
    pub async fn serve(self: Arc<Self>, registry: Arc<methods::MethodRegistry>) -> Result<(), RpcError> {
        loop {
            let raw = {
                let mut conn = self.conn.lock().await;
                conn.recv_frame().await?
            };
            let frame = Frame::decode(&raw)?;
            if frame.is_sentinel() {
                continue;
            }
            if frame.req < 0 {
                let mut pending = self.pending.lock().await;
                if let Some(tx) = pending.get(&frame.req) {
                    let _ = tx.send(frame.clone());
                    if !frame.stream || frame.end_or_err {
                        pending.remove(&frame.req);
                    }
                }
                continue;
            }

            let self_clone = self.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                let _ = self_clone.handle_incoming_call(frame, registry).await;
            });
        }
    }

    async fn handle_incoming_call(
        &self,
        frame: Frame,
        registry: Arc<methods::MethodRegistry>,
    ) -> Result<(), RpcError> {
        let req: Value = serde_json::from_slice(&frame.body)?;
        let name: Vec<String> = req
            .get("name")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let args = req.get("args").cloned().unwrap_or(Value::Null);
        let reply_req = -frame.req;

        let outcome = registry.dispatch(&name, args).await;
        let mut conn = self.conn.lock().await;
        match outcome {
            Ok(methods::MethodOutcome::Single(value)) => {
                conn.send_frame(&Frame::json(reply_req, false, false, &value).encode())
                    .await?;
            }
            Ok(methods::MethodOutcome::Stream(mut items)) => {
                while let Some(item) = items.recv().await {
                    conn.send_frame(&Frame::json(reply_req, true, false, &item).encode())
                        .await?;
                }
                conn.send_frame(&Frame::json(reply_req, true, true, &Value::Null).encode())
                    .await?;
            }
            Ok(methods::MethodOutcome::BinaryStream(mut chunks)) => {
                while let Some(chunk) = chunks.recv().await {
                    let frame = Frame {
                        req: reply_req,
                        stream: true,
                        end_or_err: false,
                        body_type: BodyType::Binary,
                        body: chunk,
                    };
                    conn.send_frame(&frame.encode()).await?;
                }
                let end = Frame {
                    req: reply_req,
                    stream: true,
                    end_or_err: true,
                    body_type: BodyType::Binary,
                    body: Vec::new(),
                };
                conn.send_frame(&end.encode()).await?;
            }
            Ok(methods::MethodOutcome::StreamError(message)) => {
                let frame = Frame {
                    req: reply_req,
                    stream: true,
                    end_or_err: true,
                    body_type: BodyType::Utf8,
                    body: message.into_bytes(),
                };
                conn.send_frame(&frame.encode()).await?;
            }
            Err(e) => {
                let err_body = serde_json::json!({ "error": e.to_string() });
                conn.send_frame(&Frame::json(reply_req, false, true, &err_body).encode())
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_wire_bytes() {
        let f = Frame::json(5, true, false, &serde_json::json!({"a": 1}));
        let bytes = f.encode();
        let back = Frame::decode(&bytes).unwrap();
        assert_eq!(back.req, 5);
        assert!(back.stream);
        assert!(!back.end_or_err);
        assert_eq!(back.body_type, BodyType::Json);
    }

    #[test]
    fn sentinel_is_all_zero_header() {
        let f = Frame::end_of_stream_sentinel();
        let bytes = f.encode();
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(Frame::decode(&bytes).unwrap().is_sentinel());
    }

    #[test]
    fn decode_rejects_truncated_header() {
        assert!(matches!(Frame::decode(&[0u8; 3]), Err(RpcError::Truncated)));
    }
}
