//! Line-delimited stdio transport: one JSON request per line, one JSON
//! reply per line, plus a `ready` event on startup.

use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use ocmem_core::Result;

use crate::Gateway;

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: serde_json::Value,
    verb: String,
    #[serde(default)]
    args: serde_json::Value,
}

/// Serve requests from stdin until EOF.
pub async fn run(gateway: Arc<Gateway>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    write_line(&mut stdout, &serde_json::json!({ "event": "ready" })).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => {
                let result = gateway.handle(&request.verb, &request.args).await;
                serde_json::json!({ "id": request.id, "result": result })
            }
            Err(e) => {
                warn!(error = %e, "malformed request line");
                serde_json::json!({ "id": null, "error": format!("malformed request: {e}") })
            }
        };
        write_line(&mut stdout, &reply).await?;
    }
    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, value: &serde_json::Value) -> Result<()> {
    let mut buf = serde_json::to_vec(value)?;
    buf.push(b'\n');
    stdout.write_all(&buf).await?;
    stdout.flush().await?;
    Ok(())
}
