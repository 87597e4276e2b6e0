use crate::error::{AppError, AppResult};
use crate::session::StatusSnapshot;
use crate::state::AppState;
use crate::status::StatusView;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::wrappers::WatchStream;

fn status_body(snapshot: &StatusSnapshot) -> serde_json::Value {
    json!({
        "view": StatusView::from(snapshot),
        "session": snapshot
    })
}

/// User start. Answers with the resulting status; a busy session is left untouched.
pub async fn start_session(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let snapshot = state
        .session
        .start()
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;
    Ok(HttpResponse::Ok().json(status_body(&snapshot)))
}

pub async fn stop_session(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let snapshot = state
        .session
        .stop()
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;
    Ok(HttpResponse::Ok().json(status_body(&snapshot)))
}

pub async fn session_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(status_body(&state.session.snapshot()))
}

/// Server-Sent Events: the current status first, then one event per change.
pub async fn session_events(state: web::Data<AppState>) -> HttpResponse {
    let stream = WatchStream::new(state.session.subscribe()).map(|snapshot| {
        let frame = format!("event: status\ndata: {}\n\n", status_body(&snapshot));
        Ok::<_, Infallible>(web::Bytes::from(frame))
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream)
}
