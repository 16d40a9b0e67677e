//! End-to-end tests through the application context.

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use nano::prelude::*;
use nano_telemetry::SinkRecord;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

const CONFIG: &str = r#"
[server]
name = "orders"
group = "shop"

[logging]
access_log_percent = 100
writers = 2
queue_capacity = 500
"#;

fn config(vars: &[(&str, &str)]) -> NanoConfig {
    ConfigLoader::new()
        .with_string(CONFIG, "toml")
        .unwrap()
        .with_deployment_env()
        .with_env_prefix("NANO")
        .load_from_vars(
            vars.iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        )
        .unwrap()
}

fn router() -> Router {
    Router::new()
        .route(Method::GET, "/orders", |_, _| async {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(Response::json(StatusCode::OK, &json!({ "orders": [] })))
        })
        .route(Method::POST, "/orders", |_, _| async {
            Err(ServerError::project_validator()
                .with_details(vec!["quantity must be positive".into()])
                .into())
        })
        .route(Method::GET, "/panic", |ctx: RequestContext, _| async move {
            if !ctx.request_id().is_empty() {
                panic!("boom");
            }
            Ok(Response::json(StatusCode::OK, &json!({})))
        })
        .route(Method::GET, "/metric", |_, _| async {
            Ok(Response::json(StatusCode::OK, &json!({ "up": 1 })))
        })
}

fn app(config: NanoConfig, sink: &MemorySink) -> App {
    App::builder()
        .config(config)
        .sink(sink.clone())
        .router(router())
        .build()
        .unwrap()
}

fn request(method: Method, uri: &str) -> Request {
    let mut request = http::Request::builder()
        .method(method)
        .uri(uri)
        .header("User-Agent", "e2e/1.0")
        .header(keys::SERVER_NAME, "checkout")
        .header(keys::SERVER_GROUP, "shop")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let peer: SocketAddr = "[::1]:50000".parse().unwrap();
    request.extensions_mut().insert(peer);
    request
}

async fn body(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn only(records: Vec<nano_telemetry::CapturedRecord>) -> SinkRecord {
    assert_eq!(records.len(), 1, "expected exactly one record");
    records.into_iter().next().unwrap().record
}

#[tokio::test]
async fn test_declared_error_end_to_end() {
    let sink = MemorySink::new();
    let app = app(config(&[]), &sink);

    let response = app.handle(request(Method::POST, "/orders?id=7")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body(response).await;
    assert_eq!(json["code"], "10002");
    assert_eq!(json["msg"], "project_validator_error");
    assert_eq!(json["details"], json!(["quantity must be positive"]));

    app.shutdown();
    let record = only(sink.records_for("warning"));
    assert_eq!(record.log_type, "warning");
    assert_eq!(record.event, "shop_orders_error");
    assert_eq!(record.log_server, "orders");
    assert_eq!(record.log_server_group, "shop");
    assert_eq!(record.from_app, "checkout");
    assert_eq!(record.from_project, "shop");
    assert_eq!(record.client_ip, "127.0.0.1");
    assert_eq!(record.user_agent, "e2e/1.0");
    assert_eq!(record.request_type, "rest");
    assert_eq!(record.error_code.as_deref(), Some("10002"));
    assert_eq!(record.query.as_deref(), Some("id=7"));
    assert!(sink.records_for("access").is_empty());
}

#[tokio::test]
async fn test_string_panic_end_to_end() {
    let sink = MemorySink::new();
    let app = app(config(&[]), &sink);

    let response = app.handle(request(Method::GET, "/panic")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body(response).await;
    assert_eq!(json["code"], "10000");
    assert_eq!(json["details"], json!(["boom"]));

    app.shutdown();
    let record = only(sink.records_for("error"));
    assert_eq!(record.error_code.as_deref(), Some("10000"));
    assert_eq!(record.reason.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_access_record_has_duration() {
    let sink = MemorySink::new();
    let app = app(config(&[]), &sink);

    let response = app.handle(request(Method::GET, "/orders")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response
        .headers()
        .get(nano::middleware::REQUEST_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    app.shutdown();
    let record = only(sink.records_for("access"));
    assert_eq!(record.event, "shop_orders_access");
    assert_eq!(record.request_id, request_id);
    assert!(record.time >= 0.002);
    assert!(record.error_code.is_none());
}

#[tokio::test]
async fn test_deployment_stream_names_and_sampling() {
    let sink = MemorySink::new();
    let app = app(
        config(&[
            ("ACCESS_LOG_NAME", "orders-access"),
            ("OPEN_ACCESS_LOG", "0"),
            ("LOG_WRITER_NUM", "3"),
        ]),
        &sink,
    );
    assert_eq!(app.config().logging.writer_count(), 3);

    for _ in 0..20 {
        app.handle(request(Method::GET, "/orders")).await;
    }
    let mut config = app.config();
    config.logging.access_log_percent = 100;
    app.reconfigure(config).unwrap();
    app.handle(request(Method::GET, "/orders")).await;

    app.shutdown();
    assert_eq!(sink.records_for("orders-access").len(), 1);
    assert!(sink.records_for("access").is_empty());
}

#[tokio::test]
async fn test_metric_path_is_not_access_logged() {
    let sink = MemorySink::new();
    let app = app(config(&[]), &sink);

    let response = app.handle(request(Method::GET, "/metric")).await;
    assert_eq!(response.status(), StatusCode::OK);

    app.shutdown();
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_debug_mode_toggled_by_reconfigure() {
    let sink = MemorySink::new();
    let app = App::builder()
        .config(config(&[]))
        .sink(sink.clone())
        .router(Router::new().route(Method::GET, "/db", |_, _| async {
            Err(HandlerError::other(anyhow::anyhow!("connection refused")))
        }))
        .build()
        .unwrap();

    let json = body(app.handle(request(Method::GET, "/db")).await).await;
    assert_eq!(json["msg"], "unknow_error");

    app.reconfigure(config(&[("NANO__SERVER__DEBUG", "true")]))
        .unwrap();
    let json = body(app.handle(request(Method::GET, "/db")).await).await;
    assert_eq!(json["code"], "10001");
    assert!(json["msg"]
        .as_str()
        .unwrap()
        .contains("connection refused"));

    app.shutdown();
    let errors = sink.records_for("error");
    assert_eq!(errors.len(), 2);
    for record in errors {
        assert_eq!(record.record.error_code.as_deref(), Some("10001"));
        assert!(record
            .record
            .reason
            .unwrap()
            .starts_with("[Recovery] panic recovered:\nconnection refused"));
    }
}

#[tokio::test]
async fn test_unary_call_end_to_end() {
    let sink = MemorySink::new();
    let app = app(config(&[]), &sink);
    app.register_error(ServerError::new(
        "order_locked",
        "20010",
        StatusCode::CONFLICT,
    ))
    .unwrap();

    let mut metadata = Metadata::new();
    metadata.set(keys::REQUEST_ID, "rpc-7");
    let err = app
        .unary(
            "/shop.Orders/Cancel",
            &mut metadata,
            None,
            "order-1".to_string(),
            |_, _| async { Err::<(), _>(HandlerError::other(anyhow::anyhow!("order_locked"))) },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, "20010");
    assert_eq!(err.status_code(), StatusCode::CONFLICT);

    app.shutdown();
    let record = only(sink.records_for("warning"));
    assert_eq!(record.request_id, "rpc-7");
    assert_eq!(record.request_type, "grpc");
    assert_eq!(record.query.as_deref(), Some("\"order-1\""));
}

#[tokio::test]
async fn test_project_record() {
    let sink = MemorySink::new();
    let app = app(config(&[]), &sink);
    let ctx = RequestContext::base(RequestType::Rest).with(keys::REQUEST_ID, "req-9");

    app.project(
        Level::INFO,
        "order created",
        "create",
        Some(&ctx),
        &[("order_id", json!(42))],
    )
    .unwrap();
    assert!(app
        .project(Level::INFO, "bad", "9lives", None, &[])
        .is_err());

    app.shutdown();
    let record = only(sink.records_for("shop_orders_create"));
    assert_eq!(record.request_id, "req-9");
    assert_eq!(record.properties["create_order_id"], json!(42));
    assert_eq!(record.properties["log_act"], json!("create"));
}

#[tokio::test]
async fn test_directory_sink_writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirectorySink::new(dir.path()).unwrap();
    let path = sink.stream_path("access");
    let app = App::builder()
        .config(config(&[]))
        .sink(sink)
        .router(router())
        .build()
        .unwrap();

    for _ in 0..3 {
        app.handle(request(Method::GET, "/orders")).await;
    }
    app.shutdown();

    let content = std::fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["log_type"], "access");
        assert_eq!(value["logServer"], "orders");
    }
}
