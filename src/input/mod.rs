/// 视频输入系统 (Video Input System)
///
/// - FrameSource: 帧源接口, `read()` 无帧时返回 None, 由调用方重试
/// - FfmpegSource: RTSP / 本地摄像头解码 (ffmpeg 特性)
/// - ImageSequenceSource: 图片目录回放
/// - open_source: RTSP → 摄像头 → 图片目录 依次回退
#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
pub mod images;

#[cfg(feature = "ffmpeg")]
pub use decoder::FfmpegSource;
pub use images::ImageSequenceSource;

use image::RgbImage;
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::error::{Result, SentinelError};

pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// 取一帧; 暂时无帧返回 None (不报错)
    fn read(&mut self) -> Option<RgbImage>;

    /// 释放底层资源, 可重复调用
    fn release(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read(&mut self) -> Option<RgbImage> {
        (**self).read()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// 按 RTSP → 摄像头 → 图片目录 的顺序打开第一个可用帧源
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    let mut tried = Vec::new();

    if let Some(url) = &config.rtsp_url {
        #[cfg(feature = "ffmpeg")]
        match FfmpegSource::rtsp(url) {
            Ok(source) => return Ok(Box::new(source)),
            Err(e) => {
                warn!("⚠️ RTSP 打开失败, 尝试下一个帧源: {}", e);
                tried.push(format!("rtsp ({e})"));
            }
        }
        #[cfg(not(feature = "ffmpeg"))]
        {
            warn!("⚠️ 未启用 ffmpeg 特性, 跳过 RTSP {}", url);
            tried.push("rtsp (ffmpeg feature disabled)".to_string());
        }
    }

    if let Some(index) = config.webcam_index {
        #[cfg(feature = "ffmpeg")]
        match FfmpegSource::camera(index) {
            Ok(source) => return Ok(Box::new(source)),
            Err(e) => {
                warn!("⚠️ 摄像头打开失败, 尝试下一个帧源: {}", e);
                tried.push(format!("webcam ({e})"));
            }
        }
        #[cfg(not(feature = "ffmpeg"))]
        {
            warn!("⚠️ 未启用 ffmpeg 特性, 跳过摄像头 #{}", index);
            tried.push("webcam (ffmpeg feature disabled)".to_string());
        }
    }

    if let Some(dir) = &config.image_dir {
        match ImageSequenceSource::open(dir, config.loop_images) {
            Ok(source) => return Ok(Box::new(source)),
            Err(e) => {
                warn!("⚠️ 图片目录打开失败: {}", e);
                tried.push(format!("images ({e})"));
            }
        }
    }

    if tried.is_empty() {
        return Err(SentinelError::FatalInit("no frame source configured".to_string()));
    }
    warn!("❌ 所有帧源均不可用");
    Err(SentinelError::FatalInit(format!(
        "no frame source could be opened: {}",
        tried.join(", ")
    )))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 按脚本出帧的帧源: None 表示该次读取无帧
    pub struct ScriptedSource {
        pub script: VecDeque<Option<RgbImage>>,
        pub releases: Arc<AtomicUsize>,
        released: bool,
    }

    impl ScriptedSource {
        pub fn new(script: Vec<Option<RgbImage>>) -> Self {
            Self {
                script: script.into(),
                releases: Arc::new(AtomicUsize::new(0)),
                released: false,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn read(&mut self) -> Option<RgbImage> {
            self.script.pop_front().flatten()
        }

        fn release(&mut self) {
            if !self.released {
                self.released = true;
                self.releases.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_nothing_configured_is_fatal() {
        let err = open_source(&SourceConfig::default()).err().unwrap();
        assert!(matches!(err, SentinelError::FatalInit(_)));
    }

    #[test]
    fn test_falls_back_to_image_dir() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("a.png")).unwrap();
        let config = SourceConfig {
            // 打不开的 RTSP / 摄像头 都会回退
            rtsp_url: Some("rtsp://127.0.0.1:1/none".to_string()),
            webcam_index: Some(99),
            image_dir: Some(dir.path().to_path_buf()),
            loop_images: false,
        };
        let mut source = open_source(&config).unwrap();
        assert!(source.name().starts_with("images:"));
        assert!(source.read().is_some());
    }

    #[test]
    fn test_all_sources_failing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = SourceConfig {
            image_dir: Some(dir.path().join("missing")),
            ..Default::default()
        };
        assert!(matches!(open_source(&config), Err(SentinelError::FatalInit(_))));
    }
}
