//! 运动检测策略
//!
//! 灰度帧差 → 二值化 → 统计变化像素。帧差是廉价的预筛选,
//! 只有疑似运动 (或录像进行中) 时才调用检测器。

use image::{imageops, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::policy::{Assessment, QualificationPolicy};
use super::verdict::Verdict;
use super::zone::Zone;
use crate::analytics::policy::in_zone;
use crate::detection::{Detection, Detector};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// 像素差 > pixel_threshold 视为变化
    pub pixel_threshold: u8,
    /// 变化像素数 > min_changed_pixels 视为运动
    pub min_changed_pixels: u32,
    pub target_label: String,
    pub person_confidence: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pixel_threshold: 40,
            min_changed_pixels: 5500,
            target_label: "person".to_string(),
            person_confidence: 0.5,
        }
    }
}

pub struct MotionPolicy {
    config: MotionConfig,
    prev_gray: Option<GrayImage>,
}

impl MotionPolicy {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            prev_gray: None,
        }
    }

    pub fn has_reference(&self) -> bool {
        self.prev_gray.is_some()
    }

    /// 统计与上一帧相比变化的像素数
    pub fn changed_pixels(prev: &GrayImage, gray: &GrayImage, threshold: u8) -> u32 {
        prev.as_raw()
            .iter()
            .zip(gray.as_raw())
            .filter(|(a, b)| a.abs_diff(**b) > threshold)
            .count() as u32
    }
}

impl QualificationPolicy for MotionPolicy {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn assess(
        &mut self,
        frame: &RgbImage,
        detector: &mut dyn Detector,
        zone: Option<&Zone>,
        force_detect: bool,
    ) -> anyhow::Result<Assessment> {
        let gray = imageops::grayscale(frame);

        // 首帧 (或分辨率变化) 只保存参考帧
        let prev = match self.prev_gray.take() {
            Some(prev) if prev.dimensions() == gray.dimensions() => prev,
            _ => {
                debug!("motion reference frame seeded ({}x{})", gray.width(), gray.height());
                self.prev_gray = Some(gray);
                return Ok(Assessment {
                    verdict: Verdict::motion(0, false, false),
                    highlights: Vec::new(),
                });
            }
        };

        let changed = Self::changed_pixels(&prev, &gray, self.config.pixel_threshold);
        self.prev_gray = Some(gray);
        let motion = changed > self.config.min_changed_pixels;

        let highlights: Vec<Detection> = if motion || force_detect {
            detector
                .infer(frame)?
                .into_iter()
                .filter(|d| d.is(&self.config.target_label))
                .filter(|d| d.confidence > self.config.person_confidence)
                .filter(|d| in_zone(d, zone))
                .collect()
        } else {
            Vec::new()
        };

        Ok(Assessment {
            verdict: Verdict::motion(changed, motion, !highlights.is_empty()),
            highlights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::policy::tests::{person_at, FixedDetector};
    use crate::analytics::verdict::Metric;
    use image::Rgb;

    fn config() -> MotionConfig {
        MotionConfig {
            min_changed_pixels: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_frame_seeds_reference() {
        let mut policy = MotionPolicy::new(config());
        let mut det = FixedDetector::new(vec![person_at(20.0, 20.0, 0.9)]);
        let frame = RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]));

        let a = policy.assess(&frame, &mut det, None, true).unwrap();
        assert!(!a.verdict.qualifies);
        assert!(policy.has_reference());
        assert_eq!(det.calls, 0);
    }

    #[test]
    fn test_static_scene_skips_detector() {
        let mut policy = MotionPolicy::new(config());
        let mut det = FixedDetector::new(vec![person_at(20.0, 20.0, 0.9)]);
        let frame = RgbImage::from_pixel(64, 64, Rgb([40, 40, 40]));
        policy.assess(&frame, &mut det, None, false).unwrap();
        let a = policy.assess(&frame, &mut det, None, false).unwrap();

        assert_eq!(a.verdict.metric, Metric::Motion { changed_pixels: 0, person: false });
        assert_eq!(det.calls, 0);
    }

    #[test]
    fn test_motion_with_person_qualifies() {
        let mut policy = MotionPolicy::new(config());
        let mut det = FixedDetector::new(vec![person_at(20.0, 20.0, 0.9)]);
        let dark = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        let bright = RgbImage::from_pixel(64, 64, Rgb([200, 200, 200]));
        policy.assess(&dark, &mut det, None, false).unwrap();
        let a = policy.assess(&bright, &mut det, None, false).unwrap();

        assert!(a.verdict.qualifies);
        assert_eq!(det.calls, 1);
        assert_eq!(a.highlights.len(), 1);
    }

    #[test]
    fn test_forced_detection_without_motion() {
        let mut policy = MotionPolicy::new(config());
        let mut det = FixedDetector::new(vec![person_at(20.0, 20.0, 0.9)]);
        let frame = RgbImage::from_pixel(64, 64, Rgb([10, 10, 10]));
        policy.assess(&frame, &mut det, None, false).unwrap();
        let a = policy.assess(&frame, &mut det, None, true).unwrap();

        assert_eq!(det.calls, 1);
        assert!(!a.verdict.qualifies);
        assert_eq!(a.verdict.metric, Metric::Motion { changed_pixels: 0, person: true });
    }

    #[test]
    fn test_resolution_change_reseeds() {
        let mut policy = MotionPolicy::new(config());
        let mut det = FixedDetector::new(vec![]);
        policy.assess(&RgbImage::new(64, 64), &mut det, None, false).unwrap();
        let a = policy
            .assess(&RgbImage::from_pixel(32, 32, Rgb([255, 255, 255])), &mut det, None, false)
            .unwrap();
        assert!(!a.verdict.qualifies);
        assert_eq!(det.calls, 0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let prev = GrayImage::from_pixel(4, 4, image::Luma([100]));
        let same_delta = GrayImage::from_pixel(4, 4, image::Luma([140]));
        let more = GrayImage::from_pixel(4, 4, image::Luma([141]));
        assert_eq!(MotionPolicy::changed_pixels(&prev, &same_delta, 40), 0);
        assert_eq!(MotionPolicy::changed_pixels(&prev, &more, 40), 16);
    }
}
