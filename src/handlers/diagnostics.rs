use crate::device;
use crate::state::AppState;
use crate::transport::probe;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Probe the remote health endpoint on demand. Always 200; reachability is in the body.
pub async fn remote_health(state: web::Data<AppState>) -> HttpResponse {
    let remote = state.get_config().remote;
    let report = probe::probe(&remote.health_url(), remote.probe_timeout()).await;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "probe": report
    }))
}

pub async fn list_devices() -> HttpResponse {
    let inventory = web::block(device::list_devices).await;
    match inventory {
        Ok(inventory) => HttpResponse::Ok().json(inventory),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": {
                "type": "internal_error",
                "message": format!("Device enumeration failed: {}", e),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::harness_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_probe_of_unreachable_remote_is_reported_not_failed() {
        let (state, harness) = harness_state(vec![]);
        {
            let mut config = harness.config.write().unwrap();
            config.remote.base_url = "http://127.0.0.1:1".to_string();
            config.remote.probe_timeout_ms = 500;
        }
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/remote/health", web::get().to(remote_health)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/remote/health").to_request()).await;
        assert_eq!(body["probe"]["reachable"], false);
        assert_eq!(body["probe"]["url"], "http://127.0.0.1:1/api/health");
    }

    #[actix_web::test]
    async fn test_device_listing() {
        let app = test::init_service(App::new().route("/devices", web::get().to(list_devices))).await;
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/devices").to_request()).await;
        assert!(body["backend"].is_string());
        assert!(body["inputs"].is_array());
    }
}
