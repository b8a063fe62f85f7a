/// 检测数据结构定义
/// Data structures shared by detectors, policies and overlays
use serde::{Deserialize, Serialize};

/// COCO 中 "person" 的类别号
pub const PERSON_CLASS_ID: u32 = 0;

/// 检测框 (x1,y1)-(x2,y2), 像素坐标
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_xywh(xmin: f32, ymin: f32, width: f32, height: f32) -> Self {
        Self::new(xmin, ymin, xmin + width, ymin + height)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// 中心点 (整数像素, 与区域判定一致)
    pub fn centroid(&self) -> (i32, i32) {
        (
            ((self.x1 + self.x2) / 2.0).floor() as i32,
            ((self.y1 + self.y2) / 2.0).floor() as i32,
        )
    }

    /// 底边中点 (脚下位置)
    pub fn base_center(&self) -> (i32, i32) {
        (((self.x1 + self.x2) / 2.0).floor() as i32, self.y2.floor() as i32)
    }

    pub fn intersection_area(&self, another: &BBox) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn iou(&self, another: &BBox) -> f32 {
        let union = self.area() + another.area() - self.intersection_area(another);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection_area(another) / union
    }
}

/// 单个检测结果, 每帧产生, 不跨帧保留
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, class_id: u32, confidence: f32, bbox: BBox) -> Self {
        Self {
            label: label.into(),
            class_id,
            confidence,
            bbox,
        }
    }

    /// 按标签匹配 (大小写不敏感, PPE 模型里既有 "Person" 也有 "person")
    pub fn is(&self, label: &str) -> bool {
        self.label.eq_ignore_ascii_case(label)
    }
}
