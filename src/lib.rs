// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod alert; // 告警/录像状态机
pub mod analytics; // 帧分析: 区域 / 判定 / 叠加
pub mod config; // 配置参数
pub mod detection; // 检测结果与检测器接口
pub mod error; // 错误分类
pub mod input; // 视频输入系统
pub mod monitor; // 单路监控与推流会话
pub mod server; // HTTP 推流服务

#[cfg(feature = "onnx")]
pub mod models; // 模型接口与具体实现

pub use crate::alert::{AlertEvent, AlertKind, AlertMachine, AlertPolicy, AlertProfile};
pub use crate::analytics::{AnalyticsEngine, Verdict, Zone, ZoneRequest};
pub use crate::config::{Mode, SentinelConfig};
pub use crate::detection::{non_max_suppression, BBox, Detection, Detector};
pub use crate::error::{Result, SentinelError};
pub use crate::input::{open_source, FrameSource};
pub use crate::monitor::{FrameStamp, Monitor, SharedMonitor, StreamSession};
