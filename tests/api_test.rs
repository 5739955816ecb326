// Integration tests for the session HTTP API

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{advance, config_for, harness, FakeSensors, Harness, Reply};
use plant_sync::api::create_router;
use serde_json::{json, Value};
use tower::ServiceExt;

fn create_test_app(subject_id: Option<&str>) -> (Router, Harness) {
    let h = harness(&config_for(subject_id), FakeSensors::new(Reply::Moisture(35.0)));
    (create_router(h.session.clone()), h)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// GET /api/state returns the bound subject with an empty view.
#[tokio::test(start_paused = true)]
async fn test_get_state_defaults() {
    let (app, _h) = create_test_app(Some("plant-1"));

    let response = app.oneshot(empty_request("GET", "/api/state")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let state = body_json(response).await;
    assert_eq!(state["subjectId"], "plant-1");
    assert_eq!(state["reading"], Value::Null);
    assert_eq!(state["isLoading"], false);
    assert_eq!(state["polling"], false);
    assert_eq!(state["alerts"], json!([]));
    assert_eq!(state["lifecycle"], "active");
}

/// PUT /api/subject rebinds and subscribes the new subject's topics.
#[tokio::test(start_paused = true)]
async fn test_put_subject_rebinds() {
    let (app, h) = create_test_app(None);

    let response = app
        .oneshot(json_request("PUT", "/api/subject", json!({ "subjectId": "plant-9" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let state = body_json(response).await;
    assert_eq!(state["subjectId"], "plant-9");
    assert_eq!(state["topics"].as_array().unwrap().len(), 4);
    assert_eq!(h.session.subject_id().as_deref(), Some("plant-9"));
}

/// PUT /api/subject reports 503 when the channel is down, binding still applies.
#[tokio::test(start_paused = true)]
async fn test_put_subject_channel_down() {
    let (app, h) = create_test_app(None);
    h.transport.set_connected(false);

    let response = app
        .oneshot(json_request("PUT", "/api/subject", json!({ "subjectId": "plant-9" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(h.session.subject_id().as_deref(), Some("plant-9"));
    assert!(h.session.last_error().is_some());
}

/// POST /api/predict without a subject is a 400 and never reaches the service.
#[tokio::test(start_paused = true)]
async fn test_predict_requires_subject() {
    let (app, h) = create_test_app(None);

    let response = app
        .oneshot(json_request("POST", "/api/predict", json!({ "reading": { "moisture": 30 } })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.predictions.calls(), 0);
}

/// POST /api/predict normalizes a raw reading and returns the prediction.
#[tokio::test(start_paused = true)]
async fn test_predict_with_raw_reading() {
    let (app, h) = create_test_app(Some("plant-1"));

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/predict",
            json!({ "reading": { "soil_moisture": "30", "temp": 22 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let prediction = body_json(response).await;
    assert_eq!(prediction["subjectId"], "plant-1");
    assert_eq!(prediction["confidence"], 0.6);
    assert_eq!(h.session.history_snapshot().len(), 1);
}

/// POST /api/predict with an unusable reading is a 400.
#[tokio::test(start_paused = true)]
async fn test_predict_rejects_empty_reading() {
    let (app, h) = create_test_app(Some("plant-1"));

    let response = app
        .oneshot(json_request("POST", "/api/predict", json!({ "reading": { "note": "hi" } })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.predictions.calls(), 0);
}

/// POST /api/predict maps a service failure to 502.
#[tokio::test(start_paused = true)]
async fn test_predict_service_failure() {
    let (app, h) = create_test_app(Some("plant-1"));
    h.predictions.fail();

    let response = app
        .oneshot(json_request("POST", "/api/predict", json!({ "reading": { "moisture": 30 } })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("prediction service unavailable"));
}

/// POST /api/poll/start and /api/poll/stop drive the poll loop.
#[tokio::test(start_paused = true)]
async fn test_poll_start_stop() {
    let (app, h) = create_test_app(Some("plant-1"));

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/poll/start", json!({ "intervalMs": 1000 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["started"], true);

    advance(2_500).await;
    assert_eq!(h.sensors.calls(), 3);

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/api/poll/stop"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["stopped"], true);

    advance(5_000).await;
    assert_eq!(h.sensors.calls(), 3);

    let response = app.oneshot(empty_request("POST", "/api/poll/stop")).await.unwrap();
    assert_eq!(body_json(response).await["stopped"], false);
}

/// POST /api/poll/start rejects a missing subject and a zero interval.
#[tokio::test(start_paused = true)]
async fn test_poll_start_rejections() {
    let (app, _h) = create_test_app(None);
    let response = app.oneshot(empty_request("POST", "/api/poll/start")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (app, h) = create_test_app(Some("plant-1"));
    let response = app
        .oneshot(json_request("POST", "/api/poll/start", json!({ "intervalMs": 0 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!h.session.is_polling());
}

/// POST /api/lifecycle reports the resulting poll action.
#[tokio::test(start_paused = true)]
async fn test_lifecycle_transitions() {
    let (app, h) = create_test_app(Some("plant-1"));
    h.session.start_polling();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/lifecycle", json!({ "state": "background" })))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["action"], "paused");
    assert!(!h.session.is_polling());

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/lifecycle", json!({ "state": "active" })))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["action"], "resumed");
    assert!(h.session.is_polling());

    let response = app
        .oneshot(json_request("POST", "/api/lifecycle", json!({ "state": "asleep" })))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

/// DELETE /api/alerts and DELETE /api/error are independent.
#[tokio::test(start_paused = true)]
async fn test_clear_alerts_and_error() {
    let (app, h) = create_test_app(Some("plant-1"));
    h.session.connect_channel().await.unwrap();
    h.transport.publish(
        "ai/irrigation/alert/plant-1",
        json!({ "type": "low_moisture", "message": "dry" }).to_string(),
    );
    advance(1).await;

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/api/alerts"))
        .await
        .unwrap();
    let alerts = body_json(response).await;
    assert_eq!(alerts.as_array().unwrap().len(), 1);
    assert_eq!(alerts[0]["category"], "low_moisture");

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", "/api/error"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["cleared"], false);
    assert_eq!(h.session.active_alerts().len(), 1);

    let response = app
        .oneshot(empty_request("DELETE", "/api/alerts"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["cleared"], 1);
    assert!(h.session.active_alerts().is_empty());
}

/// POST /api/schedule validates the horizon and returns the plan.
#[tokio::test(start_paused = true)]
async fn test_schedule() {
    let (app, h) = create_test_app(Some("plant-1"));

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/schedule", json!({ "horizonDays": 0 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.predictions.calls(), 0);

    let response = app
        .oneshot(json_request("POST", "/api/schedule", json!({ "horizonDays": 3 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let schedule = body_json(response).await;
    assert_eq!(schedule["subjectId"], "plant-1");
    assert_eq!(schedule["plan"]["days"], 3);
    assert!(h.session.current_schedule().is_some());
}

/// GET /api/history lists predictions oldest first.
#[tokio::test(start_paused = true)]
async fn test_history_after_push() {
    let (app, h) = create_test_app(Some("plant-1"));
    h.session.connect_channel().await.unwrap();
    for confidence in [0.4, 0.9] {
        h.transport.publish(
            "ai/irrigation/prediction/plant-1",
            json!({ "prediction": { "shouldWater": true, "confidence": confidence } }).to_string(),
        );
        advance(1).await;
    }

    let response = app.oneshot(empty_request("GET", "/api/history")).await.unwrap();
    let history = body_json(response).await;
    assert_eq!(history[0]["confidence"], 0.4);
    assert_eq!(history[1]["confidence"], 0.9);
}
