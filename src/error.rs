//! 错误分类 (Error taxonomy)
//!
//! 只有 `FatalInit` 允许中止启动, 其余错误都要降级处理, 保证视频流不断。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentinelError {
    /// 暂时取不到帧, 由推流层重试
    #[error("frame source unavailable after {attempts} attempts")]
    SourceUnavailable { attempts: u32 },

    /// 区域参数非法, 原区域保持不变
    #[error("invalid zone: {0}")]
    InvalidZone(String),

    /// 告警音 / 证据写入失败
    #[error("{effect} failed: {message}")]
    SideEffect {
        effect: &'static str,
        message: String,
    },

    /// 无法打开录像输出
    #[error("cannot open recording {path}: {message}")]
    ResourceExhaustion { path: String, message: String },

    /// 启动时没有任何可用的视频源
    #[error("no frame source available: {0}")]
    FatalInit(String),

    /// 推流会话已取消
    #[error("stream session cancelled")]
    Cancelled,

    #[error("detector error: {0}")]
    Detector(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl SentinelError {
    pub fn invalid_zone(message: impl Into<String>) -> Self {
        SentinelError::InvalidZone(message.into())
    }

    pub fn side_effect(effect: &'static str, err: impl std::fmt::Display) -> Self {
        SentinelError::SideEffect {
            effect,
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = SentinelError> = std::result::Result<T, E>;
