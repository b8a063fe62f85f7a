// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 检测模型 (ONNX Runtime)
// 包含: 模型加载、预处理、推理、后处理

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};
use ndarray::{s, Array, Axis, Ix4, IxDyn};
use ort::{GraphOptimizationLevel, Session};
use tracing::{debug, info};

use super::coco_names;
use crate::config::DetectionConfig;
use crate::detection::{non_max_suppression, BBox, Detection, Detector};

/// letterbox 填充灰度
const PAD_VALUE: f32 = 144.0 / 255.0;
const CXYWH_OFFSET: usize = 4;

pub struct YoloDetector {
    session: Session,
    input_name: String,
    output_name: String,
    height: u32,
    width: u32,
    conf: f32,
    iou: f32,
    names: Vec<String>,
    profile: bool,
}

impl YoloDetector {
    /// 加载 ONNX 模型
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        Self::load(&config.model_path, config)
    }

    fn load(path: &Path, config: &DetectionConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)
            .with_context(|| format!("failed to load model {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| anyhow!("model has no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| anyhow!("model has no outputs"))?;

        let names = if config.class_names.is_empty() {
            coco_names()
        } else {
            config.class_names.clone()
        };

        let detector = Self {
            session,
            input_name,
            output_name,
            height: config.input_size,
            width: config.input_size,
            conf: config.conf_threshold,
            iou: config.iou_threshold,
            names,
            profile: false,
        };
        detector.summary(path);
        Ok(detector)
    }

    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    fn scale_wh(&self, w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
        let r = (w1 / w0).min(h1 / h0);
        (r, (w0 * r).round(), (h0 * r).round())
    }

    /// 等比缩放到输入尺寸, 左上对齐, 其余填充
    pub fn preprocess(&self, frame: &RgbImage) -> Array<f32, Ix4> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut ys = Array::from_elem((1, 3, h, w), PAD_VALUE);
        let (_, w_new, h_new) = self.scale_wh(
            frame.width() as f32,
            frame.height() as f32,
            self.width as f32,
            self.height as f32,
        );
        let img = imageops::resize(
            frame,
            (w_new as u32).max(1),
            (h_new as u32).max(1),
            imageops::FilterType::Triangle,
        );
        for (x, y, rgb) in img.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = rgb.0;
            ys[[0, 0, y, x]] = r as f32 / 255.0;
            ys[[0, 1, y, x]] = g as f32 / 255.0;
            ys[[0, 2, y, x]] = b as f32 / 255.0;
        }
        ys
    }

    pub fn postprocess(&self, preds: &Array<f32, IxDyn>, width0: u32, height0: u32) -> Result<Vec<Detection>> {
        decode_predictions(
            preds,
            (self.width, self.height),
            (width0, height0),
            self.conf,
            self.iou,
            &self.names,
        )
    }

    pub fn summary(&self, path: &Path) {
        info!(
            "🧠 YOLOv8 模型: {} | 输入 {}x{} | 类别 {} | conf {:.2} | iou {:.2}",
            path.display(),
            self.width,
            self.height,
            self.names.len(),
            self.conf,
            self.iou
        );
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Detector for YoloDetector {
    fn name(&self) -> &str {
        "yolov8"
    }

    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let t_pre = std::time::Instant::now();
        let xs = self.preprocess(frame);
        let pre = t_pre.elapsed();

        let t_run = std::time::Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => xs.view()]?)?;
        let preds = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()?
            .to_owned();
        let run = t_run.elapsed();

        let t_post = std::time::Instant::now();
        let ys = self.postprocess(&preds, frame.width(), frame.height())?;
        if self.profile {
            debug!(
                "[Model] pre {:?} | run {:?} | post {:?} | {} dets",
                pre,
                run,
                t_post.elapsed(),
                ys.len()
            );
        }
        Ok(ys)
    }
}

/// 解码输出 [1, 4 + nc, anchors] → 原图坐标的检测框 (含 NMS)
pub fn decode_predictions(
    preds: &Array<f32, IxDyn>,
    input: (u32, u32),
    original: (u32, u32),
    conf: f32,
    iou: f32,
    names: &[String],
) -> Result<Vec<Detection>> {
    let (w0, h0) = (original.0 as f32, original.1 as f32);
    let ratio = (input.0 as f32 / w0).min(input.1 as f32 / h0);

    let anchor = preds
        .axis_iter(Axis(0))
        .next()
        .ok_or_else(|| anyhow!("empty model output"))?;
    if anchor.ndim() != 2 || anchor.shape()[0] <= CXYWH_OFFSET {
        return Err(anyhow!("unexpected output shape {:?}", preds.shape()));
    }
    let nc = anchor.shape()[0] - CXYWH_OFFSET;

    let mut detections = Vec::new();
    for pred in anchor.axis_iter(Axis(1)) {
        let bbox = pred.slice(s![0..CXYWH_OFFSET]);
        let clss = pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + nc]);

        let Some((id, &confidence)) = clss
            .iter()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max })
        else {
            continue;
        };
        if confidence < conf {
            continue;
        }

        let cx = bbox[0] / ratio;
        let cy = bbox[1] / ratio;
        let w = bbox[2] / ratio;
        let h = bbox[3] / ratio;
        let x1 = (cx - w / 2.).clamp(0.0, w0);
        let y1 = (cy - h / 2.).clamp(0.0, h0);
        let x2 = (cx + w / 2.).clamp(0.0, w0);
        let y2 = (cy + h / 2.).clamp(0.0, h0);

        let label = names
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("class_{id}"));
        detections.push(Detection::new(label, id as u32, confidence, BBox::new(x1, y1, x2, y2)));
    }

    non_max_suppression(&mut detections, iou);
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 两类, 三个候选框: 两个重叠的 person + 一个低分框
    fn fake_output() -> Array<f32, IxDyn> {
        let anchors = [
            // cx, cy, w, h, person, car
            [100.0, 100.0, 40.0, 80.0, 0.9, 0.1],
            [102.0, 101.0, 40.0, 80.0, 0.7, 0.1],
            [300.0, 300.0, 20.0, 20.0, 0.1, 0.2],
        ];
        let mut out = Array::zeros((1, 6, 3)).into_dyn();
        for (a, row) in anchors.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                out[[0, c, a]] = *v;
            }
        }
        out
    }

    #[test]
    fn test_decode_scales_back_and_suppresses() {
        let names = vec!["person".to_string(), "car".to_string()];
        // 640 输入, 原图 1280x720 → ratio 0.5
        let dets = decode_predictions(&fake_output(), (640, 640), (1280, 720), 0.25, 0.45, &names).unwrap();
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!(d.label, "person");
        assert!((d.confidence - 0.9).abs() < 1e-6);
        assert_eq!(d.bbox, BBox::new(160.0, 120.0, 240.0, 280.0));
    }

    #[test]
    fn test_bad_shape_is_error() {
        let out = Array::<f32, _>::zeros((1, 3, 5)).into_dyn();
        assert!(decode_predictions(&out, (640, 640), (640, 640), 0.25, 0.45, &[]).is_err());
    }
}
