/// 告警系统 (Alert System)
///
/// 把逐帧的 Verdict 变成去抖后的告警动作:
/// - machine:  告警/录像状态机 (冷却 / 持续计时)
/// - sound:    告警音
/// - evidence: 截图证据
/// - recorder: 录像会话
pub mod evidence;
pub mod machine;
pub mod recorder;
pub mod sound;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub use evidence::EvidenceStore;
pub use machine::{AlertAction, AlertMachine, AlertOutcome, AlertPhase};
pub use recorder::{ClipSink, ClipWriter, MjpegClipSink, RecordingSession};
pub use sound::{AlertSound, SilentSound};

/// 告警类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CrowdAlert,
    PpeViolation,
    ClearArea,
    MotionAlert,
}

/// 推送给远端观看者的告警事件 (尽力而为, 不阻塞)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub message: String,
    pub reason: String,
    pub timestamp: DateTime<Local>,
    pub evidence: Option<PathBuf>,
}

/// 告警节奏策略
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AlertPolicy {
    /// 冷却去抖: 两次告警动作之间至少间隔 `cooldown`
    Cooldown { cooldown: Duration },
    /// 持续计时: 连续告警帧达到 `warning` 时升级;
    /// `recording` 为录像尾巴时长 (最后一次告警帧之后继续录多久)
    Sustained {
        warning: Option<Duration>,
        recording: Option<Duration>,
    },
}

/// 一种告警的外观: 类别 / 证据前缀 / 事件文本 / 节奏
#[derive(Clone, Debug)]
pub struct AlertProfile {
    pub kind: AlertKind,
    pub evidence_prefix: String,
    pub message: String,
    pub policy: AlertPolicy,
    pub clip_fps: f32,
}

impl AlertProfile {
    pub fn crowd(cooldown: Duration) -> Self {
        Self {
            kind: AlertKind::CrowdAlert,
            evidence_prefix: "crowd_violation".to_string(),
            message: "MAX CAPACITY REACHED".to_string(),
            policy: AlertPolicy::Cooldown { cooldown },
            clip_fps: 20.0,
        }
    }

    pub fn ppe(cooldown: Duration) -> Self {
        Self {
            kind: AlertKind::PpeViolation,
            evidence_prefix: "violation".to_string(),
            message: "PPE VIOLATION".to_string(),
            policy: AlertPolicy::Cooldown { cooldown },
            clip_fps: 20.0,
        }
    }

    pub fn zone_watch(warning: Duration) -> Self {
        Self {
            kind: AlertKind::ClearArea,
            evidence_prefix: "clear_area".to_string(),
            message: "CLEAR THE AREA".to_string(),
            policy: AlertPolicy::Sustained {
                warning: Some(warning),
                recording: None,
            },
            clip_fps: 20.0,
        }
    }

    pub fn motion(record_tail: Duration, clip_fps: f32) -> Self {
        Self {
            kind: AlertKind::MotionAlert,
            evidence_prefix: "person_motion".to_string(),
            message: "Motion Detected!".to_string(),
            policy: AlertPolicy::Sustained {
                warning: None,
                recording: Some(record_tail),
            },
            clip_fps,
        }
    }
}
