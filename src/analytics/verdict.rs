/// 每帧的分析结论
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Metric {
    /// 区域内目标人数
    Count { count: usize },
    /// 缺失的防护装备 (HELMET / VEST ...)
    Violation { missing: Vec<String> },
    /// 帧差变化像素数 + 是否同时检测到人
    Motion { changed_pixels: u32, person: bool },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub metric: Metric,
    /// 是否为告警帧
    pub qualifies: bool,
}

impl Verdict {
    pub fn count(count: usize, qualifies: bool) -> Self {
        Self {
            metric: Metric::Count { count },
            qualifies,
        }
    }

    pub fn violation(missing: Vec<String>) -> Self {
        let qualifies = !missing.is_empty();
        Self {
            metric: Metric::Violation { missing },
            qualifies,
        }
    }

    pub fn motion(changed_pixels: u32, motion: bool, person: bool) -> Self {
        Self {
            metric: Metric::Motion {
                changed_pixels,
                person,
            },
            qualifies: motion && person,
        }
    }

    /// 触发原因 (证据文件 / 告警事件文本)
    pub fn reason(&self) -> String {
        match &self.metric {
            Metric::Count { count } => format!("ZONE COUNT: {count}"),
            Metric::Violation { missing } if missing.is_empty() => "PPE OK".to_string(),
            Metric::Violation { missing } => format!("MISSING {}", missing.join(", ")),
            Metric::Motion {
                changed_pixels,
                person,
            } => {
                if *person {
                    format!("MOVING PERSON ({changed_pixels} px)")
                } else {
                    format!("MOTION ({changed_pixels} px)")
                }
            }
        }
    }
}
