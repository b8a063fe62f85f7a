/// 分析模块 (Analytics)
///
/// 原始帧 → 检测 → 区域过滤 → 判定 → 标注帧
pub mod engine;
pub mod motion;
pub mod overlay;
pub mod policy;
pub mod verdict;
pub mod zone;

pub use engine::AnalyticsEngine;
pub use motion::{MotionConfig, MotionPolicy};
pub use overlay::{Banner, Overlay};
pub use policy::{Assessment, OccupancyConfig, OccupancyPolicy, PpeConfig, PpePolicy, QualificationPolicy};
pub use verdict::{Metric, Verdict};
pub use zone::{Coord, Zone, ZoneEditor, ZoneRequest};
