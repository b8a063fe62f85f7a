/// 检测系统 (Detection System)
///
/// 检测器被视为黑盒: 输入一帧, 输出若干 `Detection`。
/// - `Detector`: 统一的检测器接口
/// - `IdleDetector`: 没有推理后端时的空检测器
/// - `non_max_suppression`: 后处理公用的 NMS
pub mod types;

use image::RgbImage;

pub use types::{BBox, Detection, PERSON_CLASS_ID};

/// 统一的检测器接口
///
/// 实现者不得修改输入帧 (只拿到 `&RgbImage`)。
/// 每帧最多调用一次, 由分析引擎保证。
pub trait Detector: Send {
    /// 检测器名称 (日志用)
    fn name(&self) -> &str;

    /// 推理: 原始帧 → 检测结果
    fn infer(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Detection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn infer(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        (**self).infer(frame)
    }
}

/// 空检测器: 永远返回空结果。
///
/// 未编译任何推理后端时使用, 画面照常推流, 但人数/违规/人员判定都不会成立。
pub struct IdleDetector;

impl Detector for IdleDetector {
    fn name(&self) -> &str {
        "idle"
    }

    fn infer(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

/// 非极大值抑制: 按置信度降序, 丢弃与已保留框 IoU 超过阈值的框
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let same_class = xs[prev_index].class_id == xs[index].class_id;
            if same_class && xs[prev_index].bbox.iou(&xs[index].bbox) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
