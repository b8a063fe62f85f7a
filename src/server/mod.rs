//! HTTP 推流服务 (axum)
//!
//! - `GET /` 观看页面, `GET /stream` MJPEG, `GET /events` 告警事件 (SSE)
//! - `/zone` 区域管理, `/clips` 告警证据文件
pub mod error;
pub mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use crossbeam_channel::Receiver;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use error::ApiError;

use crate::alert::AlertEvent;
use crate::config::ServerConfig;
use crate::monitor::{lock, SharedMonitor};

/// 推流节奏参数
#[derive(Clone, Debug)]
pub struct StreamSettings {
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub frame_interval: Duration,
    pub jpeg_quality: u8,
}

impl From<&ServerConfig> for StreamSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            retry_attempts: config.retry_attempts,
            retry_backoff: config.retry_backoff(),
            frame_interval: config.frame_interval(),
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// Shared state across all handlers
#[derive(Clone)]
pub struct AppState {
    pub monitor: SharedMonitor,
    pub events: broadcast::Sender<AlertEvent>,
    pub stream: StreamSettings,
}

impl AppState {
    pub fn new(monitor: SharedMonitor, stream: StreamSettings) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            monitor,
            events,
            stream,
        }
    }

    /// 把告警状态机的事件通道转接到 SSE 广播; 发送端全部关闭后线程退出
    pub fn relay_events(&self, alerts: Receiver<AlertEvent>) -> std::io::Result<std::thread::JoinHandle<()>> {
        let events = self.events.clone();
        std::thread::Builder::new()
            .name("alert-relay".to_string())
            .spawn(move || {
                for event in alerts.iter() {
                    // 没有订阅者时直接丢弃
                    let _ = events.send(event);
                }
            })
    }
}

pub fn router(state: AppState, clips_dir: PathBuf) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/stream", get(routes::stream))
        .route("/events", get(routes::events))
        .route("/status", get(routes::status))
        .route(
            "/zone",
            get(routes::get_zone)
                .post(routes::set_zone)
                .delete(routes::clear_zone),
        )
        .route("/zone/click", post(routes::click_zone))
        .route("/zone/reset", post(routes::reset_clicks))
        .nest_service("/clips", ServeDir::new(clips_dir))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// 启动服务, Ctrl-C 后优雅退出并关闭监控
pub async fn serve(state: AppState, config: &ServerConfig, clips_dir: PathBuf) -> anyhow::Result<()> {
    let monitor = state.monitor.clone();
    let app = router(state, clips_dir);

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 数字卫兵推流服务: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 录像文件必须在进程退出前关闭
    lock(&monitor).shutdown();
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("🛑 收到 Ctrl-C, 正在关闭..."),
        Err(e) => warn!("⚠️ 无法监听 Ctrl-C: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertKind, AlertMachine, AlertProfile, EvidenceStore};
    use crate::analytics::policy::tests::FixedDetector;
    use crate::analytics::{AnalyticsEngine, OccupancyConfig, OccupancyPolicy, Overlay, Zone};
    use crate::input::tests::ScriptedSource;
    use crate::monitor::Monitor;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use image::RgbImage;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> (Router, AppState) {
        let overlay = Arc::new(Overlay::without_text());
        let engine = AnalyticsEngine::new(
            Box::new(FixedDetector::new(vec![])),
            Box::new(OccupancyPolicy::new(OccupancyConfig::default())),
            Arc::clone(&overlay),
        );
        let alerts = AlertMachine::new(
            AlertProfile::crowd(Duration::from_secs(5)),
            EvidenceStore::open(dir).unwrap(),
            overlay,
        );
        let source = ScriptedSource::new(vec![Some(RgbImage::new(32, 24)); 4]);
        let monitor = Monitor::new(Box::new(source), engine, alerts).shared();
        let state = AppState::new(monitor, StreamSettings::from(&ServerConfig::default()));
        (router(state.clone(), dir.to_path_buf()), state)
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_zone_and_reject_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(dir.path());

        let resp = app
            .clone()
            .oneshot(json_request("POST", "/zone", r#"{"x1":10,"y1":"10","x2":100,"y2":100}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(json_request("POST", "/zone", r#"{"x1":10,"y1":10}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["error"], "BadRequest");

        // 原区域保留
        assert_eq!(
            lock(&state.monitor).engine().zone(),
            Some(&Zone::rect(10, 10, 100, 100).unwrap())
        );

        let resp = app
            .oneshot(Request::builder().method("DELETE").uri("/zone").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(lock(&state.monitor).engine().zone().is_none());
    }

    #[tokio::test]
    async fn test_click_editor_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(dir.path());
        for (x, y) in [(0, 0), (20, 0), (20, 20)] {
            let resp = app
                .clone()
                .oneshot(json_request("POST", "/zone/click", &format!(r#"{{"x":{x},"y":{y}}}"#)))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert_eq!(lock(&state.monitor).engine().pending_clicks().len(), 3);

        let resp = app
            .oneshot(Request::builder().method("POST").uri("/zone/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(lock(&state.monitor).engine().pending_clicks().is_empty());
    }

    #[tokio::test]
    async fn test_status_waits_for_busy_monitor_without_stalling_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(dir.path());

        // 模拟推流线程长时间持锁
        let held = state.monitor.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let holder = std::thread::spawn(move || {
            let _guard = lock(&held);
            locked_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        locked_rx.recv().unwrap();

        let request = tokio::spawn(app.oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap()));
        // 单线程运行时: 处理函数若在工作线程上等锁, 这里的计时器永远不会醒来
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!request.is_finished());

        release_tx.send(()).unwrap();
        let resp = request.await.unwrap().unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["running"], true);
        assert_eq!(v["recording"], false);
        assert_eq!(v["alerts_fired"], 0);
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn test_get_zone_reports_current_zone() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let resp = app
            .clone()
            .oneshot(json_request("POST", "/zone", r#"{"x1":5,"y1":5,"x2":20,"y2":20}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(Request::builder().uri("/zone").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(v["zone"].is_object());
        assert!(v["clicks"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_page_served() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("/stream"));
    }

    #[tokio::test]
    async fn test_relay_forwards_events() {
        let dir = tempfile::tempdir().unwrap();
        let (_, state) = app(dir.path());
        let mut rx = state.events.subscribe();
        let (tx, alerts) = crossbeam_channel::bounded(4);
        let relay = state.relay_events(alerts).unwrap();

        tx.send(AlertEvent {
            kind: AlertKind::CrowdAlert,
            message: "MAX CAPACITY REACHED".into(),
            reason: "count=3".into(),
            timestamp: chrono::Local::now(),
            evidence: None,
        })
        .unwrap();
        drop(tx);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, AlertKind::CrowdAlert);
        relay.join().unwrap();
    }

    #[test]
    fn test_multipart_part_layout() {
        let part = routes::multipart_part(b"abc");
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\n"));
        assert!(part.ends_with(b"abc\r\n"));
    }
}
