//! 告警证据存储
//!
//! 每次告警一个文件: `<前缀>_YYYYMMDD-HHMMSS.<扩展名>`。
//! 同一秒内的重名文件直接覆盖。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::RgbImage;
use tracing::{info, warn};

use crate::error::{Result, SentinelError};

/// 证据文件的时间戳格式 (秒级)
pub const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// 截图扩展名
pub const SNAPSHOT_EXT: &str = "jpg";
/// 录像扩展名 (Motion-JPEG 码流)
pub const CLIP_EXT: &str = "mjpeg";

pub fn gen_time_string(at: &DateTime<Local>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

#[derive(Clone, Debug)]
pub struct EvidenceStore {
    dir: PathBuf,
}

impl EvidenceStore {
    /// 创建证据目录 (已存在则直接使用)
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        info!("📁 告警证据目录: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, prefix: &str, ext: &str, at: &DateTime<Local>) -> PathBuf {
        self.dir
            .join(format!("{}_{}.{}", prefix, gen_time_string(at), ext))
    }

    pub fn clip_path(&self, prefix: &str) -> PathBuf {
        self.path_for(prefix, CLIP_EXT, &Local::now())
    }

    /// 保存截图; 失败只报告, 不影响状态机
    pub fn snapshot(&self, prefix: &str, frame: &RgbImage) -> Result<PathBuf> {
        let path = self.path_for(prefix, SNAPSHOT_EXT, &Local::now());
        match frame.save(&path) {
            Ok(()) => {
                info!("📸 告警截图已保存: {}", path.display());
                Ok(path)
            }
            Err(e) => {
                warn!("❌ 告警截图保存失败 {}: {}", path.display(), e);
                Err(SentinelError::side_effect("snapshot", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_name_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::open(dir.path()).unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        let path = store.path_for("crowd_violation", SNAPSHOT_EXT, &at);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "crowd_violation_20240307-090502.jpg"
        );
    }

    #[test]
    fn test_snapshot_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::open(dir.path().join("alerts")).unwrap();
        let path = store.snapshot("violation", &RgbImage::new(16, 16)).unwrap();
        assert!(path.exists());
        assert!(path.starts_with(store.dir()));
    }

    #[test]
    fn test_snapshot_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::open(dir.path()).unwrap();
        std::fs::remove_dir_all(dir.path()).unwrap();
        let err = store.snapshot("violation", &RgbImage::new(16, 16)).unwrap_err();
        assert!(matches!(err, SentinelError::SideEffect { effect: "snapshot", .. }));
    }
}
