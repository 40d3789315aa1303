use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use toolgate_core::mcp::{JsonRpcResponse, McpHandler};

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Serve newline-delimited JSON-RPC on the process stdin/stdout
pub async fn serve_stdio(handler: McpHandler) -> Result<()> {
    info!(target: "server", "Serving MCP over stdio");
    serve_lines(
        handler,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

/// Read one JSON-RPC message per line from `reader` and write one response
/// per line to `writer`. Messages are handled concurrently, so responses may
/// come back out of order; clients match them by `id`. Returns after EOF once
/// every in-flight message has been answered.
pub async fn serve_lines<R, W>(handler: McpHandler, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(64);
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let handler = handler.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(response) = handler.handle_message(&line).await {
                        let _ = tx.send(response).await;
                    }
                });
            }
            Some(response) = rx.recv() => write_line(&mut writer, &response).await?,
        }
    }

    debug!(target: "server", "stdin closed; draining in-flight requests");
    drop(tx);
    while let Some(response) = rx.recv().await {
        write_line(&mut writer, &response).await?;
    }
    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, response: &JsonRpcResponse) -> Result<()> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// HTTP routes: `POST /mcp` for JSON-RPC, `GET /health` for liveness
pub fn router(handler: McpHandler) -> Router {
    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::new(handler))
}

/// Bind `addr` and serve [`router`] until Ctrl-C
pub async fn serve_http(handler: McpHandler, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        target: "server",
        url = %format!("http://{}/mcp", listener.local_addr()?),
        "Serving MCP over HTTP"
    );

    axum::serve(listener, router(handler))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "server", error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!(target: "server", "Shutting down");
}

async fn mcp_handler(State(handler): State<Arc<McpHandler>>, body: String) -> Response {
    match handler.handle_message(&body).await {
        Some(response) => Json(response).into_response(),
        // Notifications carry no reply
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health_handler(State(handler): State<Arc<McpHandler>>) -> impl IntoResponse {
    let registry = handler.gateway().registry();
    Json(json!({
        "status": "ok",
        "tools": registry.len(),
        "providers": registry.providers(),
    }))
}
