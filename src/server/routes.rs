//! HTTP 路由: 画面 / 事件 / 区域

use std::convert::Infallible;
use std::io::Cursor;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::AppState;
use crate::analytics::{Zone, ZoneRequest};
use crate::error::SentinelError;
use crate::monitor::{lock, Monitor, StreamSession};

const INDEX_HTML: &str = include_str!("index.html");

const BOUNDARY: &str = "frame";
/// 连续多少轮取不到帧后结束推流
const MAX_IDLE_ROUNDS: u32 = 10;

/// GET / - 观看页面
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::with_capacity(64 * 1024));
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(frame)?;
    Ok(buf.into_inner())
}

/// multipart/x-mixed-replace 的一个分段
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    )
    .into_bytes();
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// GET /stream - MJPEG 推流, 每个观看者一个 StreamSession
pub async fn stream(State(state): State<AppState>) -> Response {
    let (tx, mut rx) = mpsc::channel::<Bytes>(2);
    let settings = state.stream.clone();
    let mut session = StreamSession::new(state.monitor.clone(), settings.retry_attempts, settings.retry_backoff);

    tokio::task::spawn_blocking(move || {
        info!("👀 观看者接入");
        let mut idle_rounds = 0;
        loop {
            let started = Instant::now();
            match session.next_annotated_frame() {
                Ok((frame, stamp)) => {
                    idle_rounds = 0;
                    let jpeg = match encode_jpeg(&frame, settings.jpeg_quality) {
                        Ok(jpeg) => jpeg,
                        Err(e) => {
                            warn!("⚠️ JPEG 编码失败 (帧 #{}): {}", stamp.seq, e);
                            continue;
                        }
                    };
                    if tx.blocking_send(multipart_part(&jpeg)).is_err() {
                        // 观看者已断开
                        session.cancel();
                        break;
                    }
                }
                Err(SentinelError::SourceUnavailable { attempts }) => {
                    idle_rounds += 1;
                    warn!("⚠️ 帧源 {} 次重试无帧 ({}/{})", attempts, idle_rounds, MAX_IDLE_ROUNDS);
                    if idle_rounds >= MAX_IDLE_ROUNDS || tx.is_closed() {
                        break;
                    }
                    continue;
                }
                Err(SentinelError::Cancelled) => break,
                Err(e) => {
                    warn!("❌ 推流中断: {}", e);
                    break;
                }
            }
            if let Some(rest) = settings.frame_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        info!("👋 观看者离开 (已推送 {} 帧)", session.delivered());
    });

    let body = futures::stream::poll_fn(move |cx| rx.poll_recv(cx).map(|part| part.map(Ok::<_, Infallible>)));

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// GET /events - 告警事件 (SSE)
pub async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(alert) => {
                    let event = Event::default()
                        .event("alert")
                        .json_data(&alert)
                        .unwrap_or_else(|e| Event::default().comment(format!("encode error: {e}")));
                    return Some((Ok(event), rx));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("events subscriber lagged, {} dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
pub struct ZoneState {
    pub zone: Option<Zone>,
    pub clicks: Vec<(i32, i32)>,
}

fn zone_state(monitor: &Monitor) -> ZoneState {
    ZoneState {
        zone: monitor.engine().zone().cloned(),
        clicks: monitor.engine().pending_clicks().to_vec(),
    }
}

/// 在阻塞线程池里持锁操作 Monitor
///
/// 推流线程拉帧期间会长时间持有这把 std 锁, 不能在 tokio 工作线程上等待。
async fn with_monitor<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&mut Monitor) -> T + Send + 'static,
    T: Send + 'static,
{
    let monitor = state.monitor.clone();
    tokio::task::spawn_blocking(move || f(&mut lock(&monitor)))
        .await
        .map_err(|e| ApiError::Internal(format!("monitor task failed: {e}")))
}

/// GET /zone
pub async fn get_zone(State(state): State<AppState>) -> Result<Json<ZoneState>, ApiError> {
    Ok(Json(with_monitor(&state, |monitor| zone_state(monitor)).await?))
}

/// POST /zone - 整体替换区域, 非法坐标返回 400
pub async fn set_zone(State(state): State<AppState>, Json(request): Json<ZoneRequest>) -> Result<Json<ZoneState>, ApiError> {
    let zone = with_monitor(&state, move |monitor| {
        monitor.engine_mut().set_zone(&request)?;
        Ok::<_, SentinelError>(zone_state(monitor))
    })
    .await??;
    Ok(Json(zone))
}

/// DELETE /zone - 回到全画面
pub async fn clear_zone(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    with_monitor(&state, |monitor| monitor.engine_mut().clear_zone()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct Click {
    pub x: i32,
    pub y: i32,
}

/// POST /zone/click - 点击添加多边形顶点
pub async fn click_zone(State(state): State<AppState>, Json(click): Json<Click>) -> Result<Json<ZoneState>, ApiError> {
    let zone = with_monitor(&state, move |monitor| {
        monitor.engine_mut().click(click.x, click.y)?;
        Ok::<_, SentinelError>(zone_state(monitor))
    })
    .await??;
    Ok(Json(zone))
}

/// POST /zone/reset - 清空未完成的点击
pub async fn reset_clicks(State(state): State<AppState>) -> Result<Json<ZoneState>, ApiError> {
    let zone = with_monitor(&state, |monitor| {
        monitor.engine_mut().reset_clicks();
        zone_state(monitor)
    })
    .await?;
    Ok(Json(zone))
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub policy: &'static str,
    pub alerts_fired: u64,
    pub recording: bool,
    pub phase: String,
    pub running: bool,
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Result<Json<Status>, ApiError> {
    let status = with_monitor(&state, |monitor| Status {
        policy: monitor.engine().policy_name(),
        alerts_fired: monitor.alerts().fired_count(),
        recording: monitor.alerts().is_recording(),
        phase: format!("{:?}", monitor.alerts().phase(Instant::now())),
        running: !monitor.is_shut_down(),
    })
    .await?;
    Ok(Json(status))
}
