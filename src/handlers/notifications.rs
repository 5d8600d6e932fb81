use crate::{auth::AuthUser, AppState};
use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

pub fn routes() -> Router<AppState> {
    Router::new().route("/stream", get(stream))
}

/// Server-sent event stream of the caller's notifications. Each event's
/// name is the notification kind ("newOrder", "orderPaid", ...) so clients
/// can attach per-kind listeners.
#[utoipa::path(
    get,
    path = "/api/v1/notifications/stream",
    responses((status = 200, description = "SSE stream of notifications")),
    security(("bearer_auth" = [])),
    tag = "notifications"
)]
pub(crate) async fn stream(
    State(state): State<AppState>,
    user: AuthUser,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.hub.subscribe(user.id);
    let stream = BroadcastStream::new(receiver).filter_map(|result| async move {
        // A lagged receiver drops missed notifications rather than erroring
        // out the whole stream.
        let notification = result.ok()?;
        let event = SseEvent::default()
            .event(notification.kind.clone())
            .json_data(&notification)
            .ok()?;
        Some(Ok(event))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
