//! 告警录像 (Recording session)
//!
//! 录像输出在会话开始时打开, 会话结束 / 出错 / 关机时无条件释放。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};
use tracing::{info, warn};

use crate::error::{Result, SentinelError};

/// 单个录像文件的写入端
pub trait ClipWriter: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// 刷新并关闭输出
    fn finish(self: Box<Self>) -> Result<()>;
}

/// 录像输出工厂
pub trait ClipSink: Send {
    fn open(&mut self, path: &Path, width: u32, height: u32, fps: f32) -> Result<Box<dyn ClipWriter>>;
}

/// Motion-JPEG 码流: 逐帧 JPEG 拼接, ffplay / VLC 可直接播放
#[derive(Debug, Clone)]
pub struct MjpegClipSink {
    pub quality: u8,
}

impl Default for MjpegClipSink {
    fn default() -> Self {
        Self { quality: 80 }
    }
}

impl ClipSink for MjpegClipSink {
    fn open(&mut self, path: &Path, width: u32, height: u32, _fps: f32) -> Result<Box<dyn ClipWriter>> {
        let file = File::create(path).map_err(|e| SentinelError::ResourceExhaustion {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Box::new(MjpegClipWriter {
            out: BufWriter::new(file),
            width,
            height,
            quality: self.quality,
        }))
    }
}

pub struct MjpegClipWriter {
    out: BufWriter<File>,
    width: u32,
    height: u32,
    quality: u8,
}

impl ClipWriter for MjpegClipWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        // 输出尺寸在打开时固定
        let resized;
        let frame = if frame.dimensions() != (self.width, self.height) {
            resized = imageops::resize(frame, self.width, self.height, imageops::FilterType::Triangle);
            &resized
        } else {
            frame
        };
        JpegEncoder::new_with_quality(&mut self.out, self.quality).encode_image(frame)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// 一次录像会话; Drop 时自动关闭
pub struct RecordingSession {
    writer: Option<Box<dyn ClipWriter>>,
    path: PathBuf,
    started: Instant,
    last_activity: Instant,
    frames: u64,
}

impl RecordingSession {
    pub fn open(
        sink: &mut dyn ClipSink,
        path: PathBuf,
        width: u32,
        height: u32,
        fps: f32,
        now: Instant,
    ) -> Result<Self> {
        let writer = sink.open(&path, width, height, fps)?;
        info!("🔴 开始录像: {} ({}x{})", path.display(), width, height);
        Ok(Self {
            writer: Some(writer),
            path,
            started: now,
            last_activity: now,
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// 追加一帧; 写失败只记日志, 会话继续
    pub fn append(&mut self, frame: &RgbImage) {
        if let Some(writer) = self.writer.as_mut() {
            match writer.write_frame(frame) {
                Ok(()) => self.frames += 1,
                Err(e) => warn!("⚠️ 录像写帧失败 {}: {}", self.path.display(), e),
            }
        }
    }

    /// 关闭输出, 可重复调用
    pub fn close(&mut self) {
        if let Some(writer) = self.writer.take() {
            match writer.finish() {
                Ok(()) => info!(
                    "💾 录像已保存: {} ({} 帧)",
                    self.path.display(),
                    self.frames
                ),
                Err(e) => warn!("❌ 录像关闭失败 {}: {}", self.path.display(), e),
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.close();
    }
}
