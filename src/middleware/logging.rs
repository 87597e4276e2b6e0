//! Request logging and per-endpoint metrics for the control surface.
//!
//! Requests are keyed by their route pattern, so `/api/v1/session/status` and friends
//! each get one metrics entry, and unknown paths collapse into a single `unmatched`
//! entry instead of growing the map without bound.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    rc::Rc,
    time::Instant,
};
use tracing::{debug, error, info, warn};

const UNMATCHED: &str = "unmatched";

/// Logs every control-surface request and records it in the endpoint metrics.
///
/// Paths registered with [`quiet`](Self::quiet) (status polling, event streams) are
/// logged at debug level so they do not drown out session activity.
#[derive(Debug, Clone, Default)]
pub struct RequestLogging {
    quiet_suffixes: Vec<&'static str>,
}

impl RequestLogging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quiet(mut self, suffix: &'static str) -> Self {
        self.quiet_suffixes.push(suffix);
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware {
            service,
            quiet_suffixes: Rc::from(self.quiet_suffixes.clone()),
        }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
    quiet_suffixes: Rc<[&'static str]>,
}

/// What gets logged and recorded for one request.
struct RequestLine {
    method: String,
    path: String,
    endpoint: String,
    quiet: bool,
}

impl RequestLine {
    fn finish(&self, status: StatusCode, duration_ms: u64) -> bool {
        let failed = status.is_client_error() || status.is_server_error();
        let code = status.as_u16();
        if status.is_server_error() {
            warn!(method = %self.method, path = %self.path, status = code, duration_ms, "Request completed with server error");
        } else if self.quiet {
            debug!(method = %self.method, path = %self.path, status = code, duration_ms, "Request completed");
        } else {
            info!(method = %self.method, path = %self.path, status = code, duration_ms, "Request completed");
        }
        failed
    }
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let path = req.path().to_string();
        let method = req.method().to_string();
        let pattern = req.match_pattern().unwrap_or_else(|| UNMATCHED.to_string());
        let line = RequestLine {
            endpoint: format!("{} {}", method, pattern),
            quiet: self.quiet_suffixes.iter().any(|suffix| path.ends_with(suffix)),
            method,
            path,
        };
        let state = req.app_data::<web::Data<AppState>>().cloned();

        if line.quiet {
            debug!(method = %line.method, path = %line.path, "Request started");
        } else {
            info!(method = %line.method, path = %line.path, "Request started");
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let failed = match &result {
                Ok(response) => line.finish(response.status(), duration_ms),
                Err(err) => {
                    error!(method = %line.method, path = %line.path, duration_ms, error = %err, "Request failed");
                    true
                }
            };

            if let Some(state) = state {
                state.record_endpoint_request(&line.endpoint, duration_ms, failed);
            }

            result
        })
    }
}
