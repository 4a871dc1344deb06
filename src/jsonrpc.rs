//! Localhost JSON-RPC 2.0 front door.
//!
//! This is the entry point the out-of-core consumers (a web UI, an admin
//! CLI, a Markdown renderer) would talk to; none of their feature content
//! lives in this crate, only the dispatch skeleton they plug into. Methods
//! map directly onto `Store`/`Feed` operations named in the library's
//! public surface.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::store::Store;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

pub async fn serve(listener: TcpListener, store: Arc<Store>) -> std::io::Result<()> {
    loop {
        let (socket, _) = listener.accept().await?;
        let store = store.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, store).await {
                tracing::debug!(error = %e, "jsonrpc connection closed");
            }
        });
    }
}

async fn handle_connection(socket: TcpStream, store: Arc<Store>) -> std::io::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(req) => dispatch(&store, req).await,
            Err(e) => json!({"jsonrpc": "2.0", "id": Value::Null, "error": {"code": -32700, "message": e.to_string()}}),
        };
        let mut out = serde_json::to_vec(&response).unwrap_or_default();
        out.push(b'\n');
        write_half.write_all(&out).await?;
    }
    Ok(())
}

async fn dispatch(store: &Store, req: JsonRpcRequest) -> Value {
    let result = match req.method.as_str() {
        "whoami" => Ok(json!({ "id": store.identity_ref().to_string_form() })),
        "publish" => match store.publish(req.params.clone()).await {
            Ok(msg) => match msg.key() {
                Ok(k) => Ok(json!({ "key": k.to_string_form() })),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        },
        "get" => {
            let seq = req.params.get("sequence").and_then(Value::as_u64);
            let author = req
                .params
                .get("author")
                .and_then(Value::as_str)
                .and_then(|s| crate::ref_::Ref::parse(s).ok());
            match (author, seq) {
                (Some(author), Some(seq)) => match store.get_seq(&author, seq) {
                    Ok(Some(msg)) => serde_json::to_value(
                        crate::message::SignedMessageJson::try_from(&msg).unwrap(),
                    )
                    .map_err(|e| e.to_string()),
                    Ok(None) => Err("not found".to_string()),
                    Err(e) => Err(e.to_string()),
                },
                _ => Err("missing author/sequence".to_string()),
            }
        }
        other => Err(format!("unknown method {other}")),
    };

    match result {
        Ok(value) => json!({ "jsonrpc": "2.0", "id": req.id, "result": value }),
        Err(message) => json!({ "jsonrpc": "2.0", "id": req.id, "error": { "code": -32000, "message": message } }),
    }
}
