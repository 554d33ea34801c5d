//! Cloud client tests against a stub API server.

use std::net::SocketAddr;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use edgelink::cloud::{CloudClient, CloudError};

async fn start_stub() -> SocketAddr {
    let app = Router::new()
        .route("/api/v1", get(|| async { "ok" }))
        .route(
            "/api/v1/objects/:id",
            get(|Path(id): Path<String>| async move {
                if id == "edge-1" {
                    Json(json!({
                        "_id": "oid-1",
                        "id": "edge-1",
                        "models": { "id": "model-1" },
                        "config": { "devs": { "d1": "00:11" } }
                    }))
                    .into_response()
                } else {
                    (StatusCode::NOT_FOUND, Json(json!({"message": "object not found"})))
                        .into_response()
                }
            }),
        )
        .route(
            "/api/v1/models/:id",
            get(|Path(id): Path<String>| async move {
                if id == "model-1" {
                    Json(json!({
                        "_id": "model-1",
                        "data": {
                            "children": [],
                            "expressions": { "read.edge.t": "param * 2" }
                        }
                    }))
                    .into_response()
                } else {
                    (StatusCode::NOT_FOUND, Json(json!({"message": "model not found"})))
                        .into_response()
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn loads_object_and_model() {
    let addr = start_stub().await;
    let base = format!("http://{addr}/api/v1");

    let client = CloudClient::new(&base, "tok", "0.9.4").await.unwrap();

    let object = client.load_object("edge-1").await.unwrap();
    assert_eq!(object.id, "edge-1");
    assert_eq!(object.models.id, "model-1");

    let model = client.load_model(&object.models.id).await.unwrap();
    assert_eq!(model.id, "model-1");
    assert_eq!(
        model.expressions().get("read.edge.t").map(String::as_str),
        Some("param * 2")
    );
}

#[tokio::test]
async fn error_body_message_is_surfaced() {
    let addr = start_stub().await;
    let base = format!("http://{addr}/api/v1");

    let client = CloudClient::new(&base, "tok", "0.9.4").await.unwrap();

    let err = client.load_object("missing").await.unwrap_err();
    match err {
        CloudError::Api { message } => {
            assert!(message.contains("object not found"), "got: {message}");
            assert!(message.contains("load.object[missing]"), "got: {message}");
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn dead_cloud_fails_construction() {
    // nothing listens on this port
    let err = CloudClient::new("http://127.0.0.1:9/api/v1", "tok", "0.9.4").await;
    assert!(err.is_err());
}

#[tokio::test]
async fn empty_url_is_rejected() {
    assert!(matches!(
        CloudClient::new("", "tok", "0.9.4").await,
        Err(CloudError::EmptyUrl)
    ));
}
