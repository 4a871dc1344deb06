//! The RPC method registry: a process-wide table mapping dotted method
//! names (`createHistoryStream`, `blobs.get`, `blobs.has`, `gossip.ping`)
//! to handlers, populated by `OpenStore` from whichever plug-ins are
//! active: an explicit, statically-typed table instead of a global
//! init-order side effect.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum MethodError {
    #[error("unknown method {0}")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Store(#[from] crate::error::Error),
}

pub enum MethodOutcome {
    Single(Value),
    Stream(mpsc::UnboundedReceiver<Value>),
    /// A stream of raw body chunks, each sent as its own binary-typed frame.
    BinaryStream(mpsc::UnboundedReceiver<Vec<u8>>),
    /// Ends the stream immediately with an error frame carrying this
    /// message as its utf8 body, instead of a JSON `{error: ...}` wrapper.
    StreamError(String),
}

/// `blobs.get` chunks content to at most this many bytes per frame.
const BLOB_CHUNK_SIZE: usize = 1024;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<MethodOutcome, MethodError>> + Send>>;
pub type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, Handler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: &str, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MethodOutcome, MethodError>> + Send + 'static,
    {
        self.handlers
            .insert(name.to_string(), Arc::new(move |args| Box::pin(f(args))));
    }

    pub async fn dispatch(&self, name: &[String], args: Value) -> Result<MethodOutcome, MethodError> {
        let joined = name.join(".");
        let handler = self
            .handlers
            .get(&joined)
            .ok_or_else(|| MethodError::Unknown(joined.clone()))?;
        handler(args).await
    }

    pub fn method_names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

/// Registers the built-in methods every node exposes: `createHistoryStream`
/// over the feed store, and `blobs.has`/`blobs.get`/`blobs.createWants`/
/// `blobs.changes` over the blob store.
pub fn register_builtins(
    registry: &mut MethodRegistry,
    store: Arc<crate::store::Store>,
    blobs: Arc<crate::blob::BlobStore>,
) {
    {
        let store = store.clone();
        registry.register("createHistoryStream", move |args| {
            let store = store.clone();
            async move {
                let (author, seq, live) = parse_history_stream_args(&args)?;
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(async move {
                    let _ = crate::replication::drive_history_stream(store, author, seq, live, tx).await;
                });
                Ok(MethodOutcome::Stream(rx))
            }
        });
    }

    {
        let blobs = blobs.clone();
        registry.register("blobs.has", move |args| {
            let blobs = blobs.clone();
            async move {
                let blob_ref = parse_blob_ref(&args)?;
                Ok(MethodOutcome::Single(Value::Bool(blobs.has(&blob_ref))))
            }
        });
    }

    {
        let blobs = blobs.clone();
        registry.register("blobs.get", move |args| {
            let blobs = blobs.clone();
            async move {
                let blob_ref = parse_blob_ref(&args)?;
                match blobs
                    .get(&blob_ref)
                    .map_err(|e| MethodError::InvalidArgs(e.to_string()))?
                {
                    Some(content) => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        tokio::spawn(async move {
                            for chunk in content.chunks(BLOB_CHUNK_SIZE) {
                                if tx.send(chunk.to_vec()).is_err() {
                                    return;
                                }
                            }
                        });
                        Ok(MethodOutcome::BinaryStream(rx))
                    }
                    None => Ok(MethodOutcome::StreamError("Blob does not exist".into())),
                }
            }
        });
    }

    {
        let blobs = blobs.clone();
        registry.register("blobs.createWants", move |_args| {
            let blobs = blobs.clone();
            async move {
                let (tx, rx) = mpsc::unbounded_channel();
                let wanted = blobs.wanted();
                tokio::spawn(async move {
                    for blob_ref in wanted {
                        // Negative size hint: "I want this, I don't have it".
                        let item = serde_json::json!({ blob_ref.to_string_form(): -1 });
                        if tx.send(item).is_err() {
                            return;
                        }
                    }
                });
                Ok(MethodOutcome::Stream(rx))
            }
        });
    }

    registry.register("blobs.changes", move |_args| async move {
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok(MethodOutcome::Stream(rx))
    });
}

fn parse_blob_ref(args: &Value) -> Result<crate::ref_::Ref, MethodError> {
    // `blobs.get`/`blobs.has` accept either a bare ref string or
    // `{hash: ref}` / `{key: ref}`.
    let as_str = args
        .as_array()
        .and_then(|a| a.first())
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| args.as_str().map(str::to_string))
        .or_else(|| {
            args.as_array()
                .and_then(|a| a.first())
                .and_then(|v| v.get("hash").or_else(|| v.get("key")))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .ok_or_else(|| MethodError::InvalidArgs("missing blob ref".into()))?;
    crate::ref_::Ref::parse(&as_str).map_err(|e| MethodError::InvalidArgs(e.to_string()))
}

fn parse_history_stream_args(
    args: &Value,
) -> Result<(crate::ref_::Ref, u64, bool), MethodError> {
    let obj = args
        .as_array()
        .and_then(|a| a.first())
        .ok_or_else(|| MethodError::InvalidArgs("missing createHistoryStream args".into()))?;
    let author_str = obj
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| MethodError::InvalidArgs("missing id".into()))?;
    let author = crate::ref_::Ref::parse(author_str).map_err(|e| MethodError::InvalidArgs(e.to_string()))?;
    let seq = obj.get("seq").and_then(Value::as_u64).unwrap_or(1);
    let live = obj.get("live").and_then(Value::as_bool).unwrap_or(false);
    Ok((author, seq, live))
}
