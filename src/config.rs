//! 系统配置 - 通过JSON文件调整参数

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::alert::AlertProfile;
use crate::analytics::{
    MotionConfig, MotionPolicy, OccupancyConfig, OccupancyPolicy, PpeConfig, PpePolicy, QualificationPolicy, Zone,
};

/// 监控模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// 人数超限告警 (冷却去抖)
    Crowd,
    /// 区域滞留告警 (持续计时, CLEAR THE AREA)
    ZoneWatch,
    /// 防护装备违规 (冷却去抖)
    Ppe,
    /// 运动 + 人员 → 录像
    Motion,
}

/// 检测模型参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    pub input_size: u32,
    pub conf_threshold: f32, // 检测置信度阈值
    pub iou_threshold: f32,  // NMS IOU阈值
    /// 自定义类别名 (PPE 模型), 为空时使用 COCO
    pub class_names: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            class_names: Vec::new(),
        }
    }
}

/// 告警节奏参数 (秒)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub crowd_cooldown_secs: f64,
    pub ppe_cooldown_secs: f64,
    pub warning_secs: f64,
    pub record_tail_secs: f64,
    pub clip_fps: f32,
    pub evidence_dir: PathBuf,
    pub sound_path: Option<PathBuf>,
    /// 告警事件通道容量
    pub event_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            crowd_cooldown_secs: 5.0,
            ppe_cooldown_secs: 5.0,
            warning_secs: 2.0,
            record_tail_secs: 3.0,
            clip_fps: 20.0,
            evidence_dir: PathBuf::from("alerts"),
            sound_path: None,
            event_capacity: 64,
        }
    }
}

/// 帧来源 (按 RTSP → 摄像头 → 图片目录 顺序尝试)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub rtsp_url: Option<String>,
    pub webcam_index: Option<usize>,
    pub image_dir: Option<PathBuf>,
    pub loop_images: bool,
}

/// HTTP 推流参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub target_fps: u32,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            target_fps: 30,
            retry_attempts: 100,
            retry_backoff_ms: 30,
            jpeg_quality: 80,
        }
    }
}

impl ServerConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.target_fps.max(1)))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub mode: Mode,
    pub zone: Option<Zone>,
    pub font_path: Option<PathBuf>,

    pub detection: DetectionConfig,
    pub occupancy: OccupancyConfig,
    pub ppe: PpeConfig,
    pub motion: MotionConfig,
    pub alert: AlertConfig,
    pub source: SourceConfig,
    pub server: ServerConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Crowd,
            zone: None,
            font_path: None,
            detection: DetectionConfig::default(),
            occupancy: OccupancyConfig::default(),
            ppe: PpeConfig::default(),
            motion: MotionConfig::default(),
            alert: AlertConfig::default(),
            source: SourceConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl SentinelConfig {
    /// 从JSON文件加载配置
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => warn!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 按模式构建判定策略
    pub fn build_policy(&self) -> Box<dyn QualificationPolicy> {
        match self.mode {
            Mode::Crowd | Mode::ZoneWatch => Box::new(OccupancyPolicy::new(self.occupancy.clone())),
            Mode::Ppe => Box::new(PpePolicy::new(self.ppe.clone())),
            Mode::Motion => Box::new(MotionPolicy::new(self.motion.clone())),
        }
    }

    /// 按模式构建告警外观
    pub fn alert_profile(&self) -> AlertProfile {
        let a = &self.alert;
        match self.mode {
            Mode::Crowd => AlertProfile::crowd(secs(a.crowd_cooldown_secs)),
            Mode::ZoneWatch => AlertProfile::zone_watch(secs(a.warning_secs)),
            Mode::Ppe => AlertProfile::ppe(secs(a.ppe_cooldown_secs)),
            Mode::Motion => AlertProfile::motion(secs(a.record_tail_secs), a.clip_fps),
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前配置:");
        info!("  模式: {:?}", self.mode);
        info!("  模型: {}", self.detection.model_path.display());
        info!("  检测置信度: {:.2}", self.detection.conf_threshold);
        match &self.zone {
            Some(zone) => info!("  监控区域: {:?}", zone),
            None => info!("  监控区域: 全画面"),
        }
        info!("  告警证据目录: {}", self.alert.evidence_dir.display());
        info!("  推流: {}:{} @ {}fps", self.server.bind, self.server.port, self.server.target_fps);
    }
}

/// 负数/NaN 一律视为 0
fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s).unwrap_or(Duration::ZERO)
}
