//! 图片序列帧源 - 离线回放 / 测试

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{info, warn};

use super::FrameSource;
use crate::error::{Result, SentinelError};

const IMAGE_EXTS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

pub struct ImageSequenceSource {
    name: String,
    frames: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
    released: bool,
}

impl ImageSequenceSource {
    /// 按文件名排序读取目录下的图片
    pub fn open(dir: &Path, looping: bool) -> Result<Self> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |e| IMAGE_EXTS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        if frames.is_empty() {
            return Err(SentinelError::FatalInit(format!(
                "no images in {}",
                dir.display()
            )));
        }
        frames.sort();
        info!("🖼️ 图片序列: {} ({} 帧, 循环={})", dir.display(), frames.len(), looping);
        Ok(Self {
            name: format!("images:{}", dir.display()),
            frames,
            cursor: 0,
            looping,
            released: false,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Option<RgbImage> {
        if self.released {
            return None;
        }
        if self.cursor >= self.frames.len() {
            if !self.looping {
                return None;
            }
            self.cursor = 0;
        }
        let path = &self.frames[self.cursor];
        self.cursor += 1;
        match image::open(path) {
            Ok(img) => Some(img.to_rgb8()),
            Err(e) => {
                // 坏图当作"本次无帧"
                warn!("⚠️ 读取图片失败 {}: {}", path.display(), e);
                None
            }
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            info!("🛑 帧源已释放: {}", self.name);
        }
    }
}
