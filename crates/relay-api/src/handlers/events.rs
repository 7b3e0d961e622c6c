//! Event stream and negotiate handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderName;
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use futures::Stream;
use futures::stream;
use tokio::sync::mpsc;
use tracing::{debug, info};

use relay_core::error::AppError;
use relay_realtime::{RelayHub, StreamConnection, StreamFrame};

use crate::dto::response::NegotiateResponse;
use crate::error::ApiError;
use crate::extractors::{BearerCaller, StreamCaller};
use crate::state::AppState;

/// Path of the event stream route.
pub const STREAM_PATH: &str = "/api/events/stream";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// GET /api/events/stream
///
/// Authenticates before anything is opened, so a rejected caller never
/// touches the broker lease.
pub async fn stream(
    State(state): State<AppState>,
    caller: StreamCaller,
) -> Result<impl IntoResponse, ApiError> {
    let (conn, frames) = state.hub.open_stream(&caller).await?;

    let body = frame_stream(StreamGuard {
        hub: state.hub.clone(),
        conn,
        frames,
    });

    Ok(([(X_ACCEL_BUFFERING, "no")], Sse::new(body)))
}

/// GET /api/events/negotiate
pub async fn negotiate(
    State(state): State<AppState>,
    caller: BearerCaller,
) -> Result<Json<NegotiateResponse>, ApiError> {
    let started = Instant::now();
    let issuer = state
        .ticket_issuer
        .as_ref()
        .ok_or_else(|| AppError::service_unavailable("Stream tickets are not configured"))?;

    let ticket = issuer.issue(&caller.tenant_id, &caller.subject)?;

    info!(
        tenant_id = %caller.tenant_id,
        duration_ms = started.elapsed().as_millis() as u64,
        "Stream ticket issued"
    );

    Ok(Json(NegotiateResponse {
        url: format!("{STREAM_PATH}?ticket={}", ticket.token),
        tenant_id: caller.tenant_id.clone(),
        group: format!("business.{}", caller.tenant_id),
        ticket: ticket.token,
        expires_at: ticket.expires_at,
    }))
}

/// Owns one open stream for the lifetime of the response body.
///
/// Dropping it (client gone, or the body finished) closes the connection.
struct StreamGuard {
    hub: Arc<RelayHub>,
    conn: Arc<StreamConnection>,
    frames: mpsc::Receiver<StreamFrame>,
}

impl StreamGuard {
    /// Next queued frame, or `None` once the connection is closed.
    ///
    /// A frame that raced into the buffer while the connection was closing
    /// is discarded.
    async fn next_frame(&mut self) -> Option<StreamFrame> {
        let closed = self.conn.cancellation();
        let frame = tokio::select! {
            biased;
            frame = self.frames.recv() => frame,
            _ = closed.cancelled() => None,
        };
        frame.filter(|_| self.conn.is_open())
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let conn_id = self.conn.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    hub.close_stream(&conn_id).await;
                });
            }
            Err(_) => debug!(conn_id = %conn_id, "Stream dropped outside a runtime"),
        }
    }
}

fn frame_stream(guard: StreamGuard) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(guard, |mut guard| async move {
        let frame = guard.next_frame().await?;
        Some((to_sse_event(&frame), guard))
    })
}

fn to_sse_event(frame: &StreamFrame) -> Result<Event, axum::Error> {
    match frame {
        StreamFrame::Comment(text) => Ok(Event::default().comment(text)),
        StreamFrame::Event(event) => Event::default().json_data(event.as_ref()),
    }
}
