/// 数字卫兵 (Digital Sentinel)
///
/// 智能视频监控服务
///
/// 系统架构:
/// 1. 帧源:     RTSP / 摄像头 (解码线程) 或 图片目录
/// 2. 分析:     检测 + 区域判定 + 叠加绘制
/// 3. 告警:     冷却/持续计时状态机, 截图 / 录像 / 告警音
/// 4. 主线程:   HTTP 推流 (MJPEG + SSE 告警事件)
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sentinel_rs::alert::{sound, AlertMachine, EvidenceStore};
use sentinel_rs::analytics::{AnalyticsEngine, Overlay};
use sentinel_rs::config::{Mode, SentinelConfig};
use sentinel_rs::server::{self, AppState, StreamSettings};
use sentinel_rs::{open_source, Detector, Monitor};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 数字卫兵参数 (命令行优先于配置文件)
#[derive(Parser, Debug)]
#[command(author, version, about = "数字卫兵 - 智能视频监控系统", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写入默认配置)
    #[arg(short, long, default_value = "sentinel.json")]
    config: PathBuf,

    /// 监控模式
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// RTSP流地址
    #[arg(short, long)]
    rtsp_url: Option<String>,

    /// 本地摄像头编号
    #[arg(short, long)]
    webcam: Option<usize>,

    /// 图片目录 (按文件名顺序作为帧)
    #[arg(short, long)]
    images: Option<PathBuf>,

    /// 图片目录播完后从头循环
    #[arg(long = "loop")]
    loop_images: bool,

    /// 检测模型 (ONNX)
    #[arg(long)]
    model: Option<PathBuf>,

    /// HTTP 端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 告警证据目录
    #[arg(long)]
    evidence_dir: Option<PathBuf>,

    /// 告警音 (WAV)
    #[arg(long)]
    sound: Option<PathBuf>,

    /// 叠加文字字体
    #[arg(long)]
    font: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut SentinelConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if self.rtsp_url.is_some() {
            config.source.rtsp_url = self.rtsp_url;
        }
        if self.webcam.is_some() {
            config.source.webcam_index = self.webcam;
        }
        if self.images.is_some() {
            config.source.image_dir = self.images;
        }
        config.source.loop_images |= self.loop_images;
        if let Some(model) = self.model {
            config.detection.model_path = model;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = self.evidence_dir {
            config.alert.evidence_dir = dir;
        }
        if self.sound.is_some() {
            config.alert.sound_path = self.sound;
        }
        if self.font.is_some() {
            config.font_path = self.font;
        }
    }
}

fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;
    Ok(())
}

#[cfg(feature = "onnx")]
fn build_detector(config: &SentinelConfig) -> anyhow::Result<Box<dyn Detector>> {
    let detector = sentinel_rs::models::YoloDetector::new(&config.detection)
        .with_context(|| format!("加载检测模型失败: {}", config.detection.model_path.display()))?;
    Ok(Box::new(detector))
}

/// 没有推理后端: 以空检测器运行, 只推流不判定
#[cfg(not(feature = "onnx"))]
fn build_detector(config: &SentinelConfig) -> anyhow::Result<Box<dyn Detector>> {
    warn!(
        "⚠️ 未启用检测器 (使用 --features onnx 编译), 忽略模型 {}, 画面不会触发任何告警",
        config.detection.model_path.display()
    );
    Ok(Box::new(sentinel_rs::detection::IdleDetector))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let args = Args::parse();
    let mut config = SentinelConfig::load(&args.config);
    args.apply(&mut config);

    info!("🚀 数字卫兵系统启动");
    config.print_summary();

    // ========== 帧源 ==========
    let source = open_source(&config.source).context("没有可用的帧源")?;

    // ========== 分析引擎 ==========
    let detector = build_detector(&config)?;
    let overlay = Arc::new(match &config.font_path {
        Some(path) => Overlay::from_font_file(path),
        None => Overlay::bundled(),
    });
    let zone = match config.zone.clone().map(|zone| zone.validated()).transpose() {
        Ok(zone) => zone,
        Err(e) => {
            warn!("⚠️ 配置中的监控区域无效: {}, 使用全画面", e);
            None
        }
    };
    let engine = AnalyticsEngine::new(detector, config.build_policy(), Arc::clone(&overlay)).with_zone(zone);

    // ========== 告警状态机 ==========
    let evidence = EvidenceStore::open(&config.alert.evidence_dir)
        .with_context(|| format!("无法创建告警目录: {}", config.alert.evidence_dir.display()))?;
    let clips_dir = evidence.dir().to_path_buf();
    let (events_tx, events_rx) = crossbeam_channel::bounded(config.alert.event_capacity.max(1));
    let alerts = AlertMachine::new(config.alert_profile(), evidence, overlay)
        .with_sound(sound::load(config.alert.sound_path.as_deref()))
        .with_events(events_tx);

    // ========== 推流服务 ==========
    let monitor = Monitor::new(source, engine, alerts).shared();
    let state = AppState::new(monitor, StreamSettings::from(&config.server));
    state.relay_events(events_rx).context("无法启动告警事件线程")?;

    server::serve(state, &config.server, clips_dir).await?;
    info!("👋 数字卫兵已退出");
    Ok(())
}
