//! HTTP front door.
//!
//! Any POST or PUT body is piped into a fresh worker pod. The response is
//! plain text: `done.` on success, otherwise the failing phase and error.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::TryStreamExt;
use tokio::net::TcpListener;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::orchestrator::pipeline::Pipeline;

/// Shared state for the pipe API.
#[derive(Clone)]
pub struct PipeState {
    pub pipeline: Arc<Pipeline>,
}

/// The pipe API server.
pub struct PipeApi;

impl PipeApi {
    /// Build the axum router.
    pub fn router(state: PipeState) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/", post(pipe_handler).put(pipe_handler))
            .route("/{*path}", post(pipe_handler).put(pipe_handler))
            // Bodies are streamed straight through, never buffered.
            .layer(DefaultBodyLimit::disable())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind `addr` and serve until `shutdown` is cancelled.
    pub async fn start(
        state: PipeState,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        Self::serve(listener, state, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(
        listener: TcpListener,
        state: PipeState,
        shutdown: CancellationToken,
    ) -> io::Result<()> {
        tracing::info!("Pipe API listening on {}", listener.local_addr()?);

        axum::serve(listener, Self::router(state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}

async fn health_check() -> &'static str {
    "ok"
}

async fn pipe_handler(State(state): State<PipeState>, body: Body) -> Response {
    let stream = body.into_data_stream().map_err(io::Error::other);
    let mut source = StreamReader::new(stream);

    match state.pipeline.run(&mut source).await {
        Ok(_) => (StatusCode::OK, "done.").into_response(),
        Err(e) => {
            tracing::warn!(phase = e.phase(), error = %e, "Pipe request failed");
            (e.status_code(), format!("{e}\n")).into_response()
        }
    }
}
