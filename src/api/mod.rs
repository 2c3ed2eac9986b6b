pub mod handlers;

pub use handlers::*;

use axum::{
    routing::{get, post},
    Router,
};

/// 构建路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/rooms", get(list_rooms))
        .route(
            "/api/rooms/:room_id/bills",
            get(room_bills).post(save_room_bill),
        )
        .route("/api/bills/bulk", post(save_bulk_bills))
        .route("/api/bills/preview", post(preview_bill))
        .route("/api/bills/export", get(export_bills))
        .route(
            "/api/settings/default-rate",
            get(get_default_rate).put(set_default_rate),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MeterType, Room};
    use crate::service::{CommitPolicy, MemoryBillStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use bigdecimal::BigDecimal;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let store = MemoryBillStore::new(BigDecimal::from(5));
        store.add_room(Room {
            id: 1,
            room_number: "A-101".to_string(),
            category: None,
            block: Some("A".to_string()),
            meter_type: MeterType::Single,
        });
        router(AppState {
            store: Arc::new(store),
            fallback_rate: BigDecimal::from(8),
            display_scale: 2,
            policy: CommitPolicy::default(),
        })
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, method, uri, body).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_preview_uses_default_rate() {
        let body = json!({
            "readings": { "meter_type": "single", "start_units": "100", "end_units": "150" },
            "rate": ""
        });
        let (status, value) = send_json(app(), "POST", "/api/bills/preview", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["is_valid"], true);
        assert_eq!(value["data"]["total"], "250");
    }

    #[tokio::test]
    async fn test_preview_reversed_readings() {
        let body = json!({
            "readings": { "meter_type": "single", "start_units": "100", "end_units": "90" },
            "rate": "5"
        });
        let (status, value) = send_json(app(), "POST", "/api/bills/preview", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["data"]["is_valid"], false);
        assert_eq!(value["data"]["total"], "0");
    }

    #[tokio::test]
    async fn test_save_then_export() {
        let app = app();
        let body = json!({
            "month": "2024-05",
            "readings": {
                "meter_type": "single",
                "reading": { "start_units": "100", "end_units": "150" }
            },
            "rate": "5"
        });
        let (status, value) =
            send_json(app.clone(), "POST", "/api/rooms/1/bills", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["data"]["consumption"], "50");

        let (status, bytes) = send(app, "GET", "/api/bills/export?month=2024-05", None).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("1,A-101,2024-05,single,100,150"));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = app();
        let reversed = json!({
            "month": "2024-05",
            "readings": {
                "meter_type": "single",
                "reading": { "start_units": "100", "end_units": "90" }
            },
            "rate": "5"
        });
        let (status, value) =
            send_json(app.clone(), "POST", "/api/rooms/1/bills", Some(reversed)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(value["success"], false);

        let (status, _) = send_json(app.clone(), "GET", "/api/rooms/42/bills", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(app, "GET", "/api/rooms?month=2024-13", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_default_rate_settings() {
        let app = app();
        let (status, _) = send_json(
            app.clone(),
            "PUT",
            "/api/settings/default-rate",
            Some(json!({ "default_rate": "6.5" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, value) = send_json(app.clone(), "GET", "/api/settings/default-rate", None).await;
        assert_eq!(value["data"]["default_rate"], "6.5");

        let (status, _) = send_json(
            app,
            "PUT",
            "/api/settings/default-rate",
            Some(json!({ "default_rate": "-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_exponent_readings_rejected() {
        let app = app();
        let form = json!({
            "readings": { "meter_type": "single", "start_units": "1", "end_units": "1e200000000" },
            "rate": ""
        });
        let (status, value) = send_json(app.clone(), "POST", "/api/bills/preview", Some(form)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["data"]["is_valid"], false);

        let body = json!({
            "month": "2024-05",
            "readings": {
                "meter_type": "single",
                "reading": { "start_units": "1", "end_units": "1e200000000" }
            },
            "rate": "5"
        });
        let (status, value) = send_json(app, "POST", "/api/rooms/1/bills", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(value["success"], false);
    }

    #[tokio::test]
    async fn test_bulk_save_rejects_zero_consumption() {
        let app = app();
        let body = json!({
            "month": "2024-05",
            "entries": [{
                "room_id": 1,
                "readings": {
                    "meter_type": "single",
                    "reading": { "start_units": "100", "end_units": "100" }
                },
                "rate": "5"
            }]
        });
        let (status, value) = send_json(app.clone(), "POST", "/api/bills/bulk", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(value["message"].as_str().unwrap().contains("zero consumption"));

        // 单条保存默认不要求用量 > 0
        let body = json!({
            "month": "2024-05",
            "readings": {
                "meter_type": "single",
                "reading": { "start_units": "100", "end_units": "100" }
            },
            "rate": "5"
        });
        let (status, _) = send_json(app, "POST", "/api/rooms/1/bills", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
    }
}
