//! 判定策略 (Qualification policy)
//!
//! 各种分析模式只在"怎样判定告警帧"上不同, 帧处理流程相同,
//! 所以判定被抽成一个在构造时选定的策略对象。

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::verdict::Verdict;
use super::zone::Zone;
use crate::detection::{Detection, Detector};

/// 一帧的判定结果 + 需要在画面上框出的目标
#[derive(Clone, Debug, PartialEq)]
pub struct Assessment {
    pub verdict: Verdict,
    pub highlights: Vec<Detection>,
}

pub trait QualificationPolicy: Send {
    fn name(&self) -> &'static str;

    /// 每帧调用一次; 检测器最多调用一次。
    /// `force_detect` 为 true 时 (录像进行中) 不允许跳过检测。
    fn assess(
        &mut self,
        frame: &RgbImage,
        detector: &mut dyn Detector,
        zone: Option<&Zone>,
        force_detect: bool,
    ) -> anyhow::Result<Assessment>;
}

/// 目标参考点是否在区域内 (统一使用检测框中心点)
pub fn in_zone(det: &Detection, zone: Option<&Zone>) -> bool {
    match zone {
        Some(zone) => {
            let (cx, cy) = det.bbox.centroid();
            zone.contains(cx, cy)
        }
        None => true,
    }
}

// ========== 人数 / 区域占用 ==========

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyConfig {
    pub target_label: String,
    /// 置信度必须严格大于此值
    pub confirmation_threshold: f32,
    /// 人数 >= crowd_limit 判为告警
    pub crowd_limit: usize,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            target_label: "person".to_string(),
            confirmation_threshold: 0.4,
            crowd_limit: 1,
        }
    }
}

pub struct OccupancyPolicy {
    config: OccupancyConfig,
}

impl OccupancyPolicy {
    pub fn new(config: OccupancyConfig) -> Self {
        Self { config }
    }
}

impl QualificationPolicy for OccupancyPolicy {
    fn name(&self) -> &'static str {
        "occupancy"
    }

    fn assess(
        &mut self,
        frame: &RgbImage,
        detector: &mut dyn Detector,
        zone: Option<&Zone>,
        _force_detect: bool,
    ) -> anyhow::Result<Assessment> {
        let highlights: Vec<Detection> = detector
            .infer(frame)?
            .into_iter()
            .filter(|d| d.confidence > self.config.confirmation_threshold)
            .filter(|d| d.is(&self.config.target_label))
            .filter(|d| in_zone(d, zone))
            .collect();

        let count = highlights.len();
        Ok(Assessment {
            verdict: Verdict::count(count, count >= self.config.crowd_limit),
            highlights,
        })
    }
}

// ========== 防护装备 (PPE) ==========

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PpeConfig {
    pub confirmation_threshold: f32,
    /// 违规标签 → 缺失装备名称
    pub violations: Vec<(String, String)>,
}

impl Default for PpeConfig {
    fn default() -> Self {
        let table = [
            ("no_helmet", "HELMET"),
            ("no_vest", "VEST"),
            ("no_gloves", "GLOVES"),
            ("no_boots", "BOOTS"),
            ("no_goggle", "GOGGLES"),
            ("no_goggles", "GOGGLES"),
            ("none", "ALL PPE"),
        ];
        Self {
            confirmation_threshold: 0.5,
            violations: table
                .iter()
                .map(|(l, m)| (l.to_string(), m.to_string()))
                .collect(),
        }
    }
}

pub struct PpePolicy {
    config: PpeConfig,
}

impl PpePolicy {
    pub fn new(config: PpeConfig) -> Self {
        Self { config }
    }
}

impl QualificationPolicy for PpePolicy {
    fn name(&self) -> &'static str {
        "ppe"
    }

    fn assess(
        &mut self,
        frame: &RgbImage,
        detector: &mut dyn Detector,
        zone: Option<&Zone>,
        _force_detect: bool,
    ) -> anyhow::Result<Assessment> {
        let highlights: Vec<Detection> = detector
            .infer(frame)?
            .into_iter()
            .filter(|d| d.confidence > self.config.confirmation_threshold)
            .filter(|d| in_zone(d, zone))
            .collect();

        // 按表顺序输出, 去重 (no_goggle / no_goggles 都映射到 GOGGLES)
        let mut missing: Vec<String> = Vec::new();
        for (label, item) in &self.config.violations {
            if highlights.iter().any(|d| d.is(label)) && !missing.contains(item) {
                missing.push(item.clone());
            }
        }

        Ok(Assessment {
            verdict: Verdict::violation(missing),
            highlights,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analytics::verdict::Metric;
    use crate::detection::BBox;

    /// 固定输出的检测器, 记录调用次数
    pub struct FixedDetector {
        pub detections: Vec<Detection>,
        pub calls: usize,
    }

    impl FixedDetector {
        pub fn new(detections: Vec<Detection>) -> Self {
            Self {
                detections,
                calls: 0,
            }
        }
    }

    impl Detector for FixedDetector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn infer(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
            self.calls += 1;
            Ok(self.detections.clone())
        }
    }

    /// 以 (cx, cy) 为中心的 20x20 框
    pub fn person_at(cx: f32, cy: f32, conf: f32) -> Detection {
        Detection::new("person", 0, conf, BBox::new(cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0))
    }

    #[test]
    fn test_person_inside_zone_counts() {
        let frame = RgbImage::new(320, 240);
        let zone = Zone::rect(10, 10, 100, 100).unwrap();
        let mut policy = OccupancyPolicy::new(OccupancyConfig::default());

        let mut inside = FixedDetector::new(vec![person_at(50.0, 50.0, 0.6)]);
        let a = policy.assess(&frame, &mut inside, Some(&zone), false).unwrap();
        assert_eq!(a.verdict.metric, Metric::Count { count: 1 });
        assert!(a.verdict.qualifies);

        let mut outside = FixedDetector::new(vec![person_at(200.0, 200.0, 0.6)]);
        let a = policy.assess(&frame, &mut outside, Some(&zone), false).unwrap();
        assert_eq!(a.verdict.metric, Metric::Count { count: 0 });
        assert!(!a.verdict.qualifies);
    }

    #[test]
    fn test_centroid_on_zone_edge_is_inside() {
        let frame = RgbImage::new(320, 240);
        let zone = Zone::rect(10, 10, 100, 100).unwrap();
        let mut policy = OccupancyPolicy::new(OccupancyConfig::default());
        let mut det = FixedDetector::new(vec![person_at(100.0, 10.0, 0.9), person_at(10.0, 55.0, 0.9)]);
        let a = policy.assess(&frame, &mut det, Some(&zone), false).unwrap();
        assert_eq!(a.verdict.metric, Metric::Count { count: 2 });
    }

    #[test]
    fn test_low_confidence_and_other_classes_ignored() {
        let frame = RgbImage::new(320, 240);
        let mut policy = OccupancyPolicy::new(OccupancyConfig::default());
        let mut det = FixedDetector::new(vec![
            person_at(50.0, 50.0, 0.4), // 等于阈值, 不算
            Detection::new("car", 2, 0.9, BBox::new(0.0, 0.0, 10.0, 10.0)),
        ]);
        let a = policy.assess(&frame, &mut det, None, false).unwrap();
        assert_eq!(a.verdict.metric, Metric::Count { count: 0 });
        assert!(a.highlights.is_empty());
    }

    #[test]
    fn test_crowd_limit_is_at_least() {
        let frame = RgbImage::new(320, 240);
        let mut policy = OccupancyPolicy::new(OccupancyConfig {
            crowd_limit: 2,
            ..Default::default()
        });
        let mut one = FixedDetector::new(vec![person_at(50.0, 50.0, 0.9)]);
        assert!(!policy.assess(&frame, &mut one, None, false).unwrap().verdict.qualifies);
        let mut two = FixedDetector::new(vec![person_at(50.0, 50.0, 0.9), person_at(150.0, 50.0, 0.9)]);
        assert!(policy.assess(&frame, &mut two, None, false).unwrap().verdict.qualifies);
    }

    #[test]
    fn test_ppe_missing_items_in_table_order() {
        let frame = RgbImage::new(320, 240);
        let mut policy = PpePolicy::new(PpeConfig::default());
        let b = BBox::new(0.0, 0.0, 20.0, 20.0);
        let mut det = FixedDetector::new(vec![
            Detection::new("no_vest", 3, 0.8, b),
            Detection::new("no_helmet", 2, 0.7, b),
            Detection::new("no_goggle", 5, 0.9, b),
            Detection::new("no_goggles", 6, 0.9, b),
            Detection::new("no_boots", 4, 0.3, b), // 低置信度
            Detection::new("Person", 0, 0.9, b),
        ]);
        let a = policy.assess(&frame, &mut det, None, false).unwrap();
        assert_eq!(
            a.verdict.metric,
            Metric::Violation {
                missing: vec!["HELMET".into(), "VEST".into(), "GOGGLES".into()]
            }
        );
        assert!(a.verdict.qualifies);
    }

    #[test]
    fn test_ppe_clean_frame() {
        let frame = RgbImage::new(320, 240);
        let mut policy = PpePolicy::new(PpeConfig::default());
        let mut det = FixedDetector::new(vec![Detection::new("helmet", 1, 0.9, BBox::default())]);
        let a = policy.assess(&frame, &mut det, None, false).unwrap();
        assert!(!a.verdict.qualifies);
    }
}
