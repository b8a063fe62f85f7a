//! 分析引擎 (Analytics Engine)
//! 职责: 原始帧 → 检测 → 判定 → 标注帧。不产生任何副作用, 告警/录像交给 alert 模块。

use std::sync::Arc;

use image::RgbImage;
use tracing::{debug, info, warn};

use super::overlay::{banner, Overlay, GREEN};
use super::policy::QualificationPolicy;
use super::verdict::Verdict;
use super::zone::{Zone, ZoneEditor, ZoneRequest};
use crate::detection::Detector;
use crate::error::{Result, SentinelError};

pub struct AnalyticsEngine {
    detector: Box<dyn Detector>,
    policy: Box<dyn QualificationPolicy>,
    zone: Option<Zone>,
    editor: ZoneEditor,
    overlay: Arc<Overlay>,

    // 统计
    frames: u64,
}

impl AnalyticsEngine {
    pub fn new(
        detector: Box<dyn Detector>,
        policy: Box<dyn QualificationPolicy>,
        overlay: Arc<Overlay>,
    ) -> Self {
        info!(
            "🔍 分析引擎就绪: 检测器={} 策略={}",
            detector.name(),
            policy.name()
        );
        Self {
            detector,
            policy,
            zone: None,
            editor: ZoneEditor::new(),
            overlay,
            frames: 0,
        }
    }

    pub fn with_zone(mut self, zone: Option<Zone>) -> Self {
        self.zone = zone;
        self
    }

    pub fn analyze(&mut self, frame: &RgbImage) -> Result<(RgbImage, Verdict)> {
        self.analyze_with(frame, false)
    }

    /// 单帧分析。`force_detect` 由上层在录像期间置位。
    pub fn analyze_with(&mut self, frame: &RgbImage, force_detect: bool) -> Result<(RgbImage, Verdict)> {
        self.frames += 1;
        let assessment = self
            .policy
            .assess(frame, self.detector.as_mut(), self.zone.as_ref(), force_detect)
            .map_err(SentinelError::Detector)?;

        let mut annotated = frame.clone();
        if let Some(zone) = &self.zone {
            self.overlay.draw_zone(&mut annotated, zone);
        } else if !self.editor.clicks().is_empty() {
            self.overlay.draw_clicks(&mut annotated, self.editor.clicks());
        }
        self.overlay
            .draw_detections(&mut annotated, &assessment.highlights, GREEN);
        self.overlay
            .draw_banner(&mut annotated, &banner(&assessment.verdict));

        if self.frames % 300 == 0 {
            debug!("frame #{} verdict {:?}", self.frames, assessment.verdict);
        }
        Ok((annotated, assessment.verdict))
    }

    /// 整体替换区域; 非法输入直接拒绝, 原区域保留
    pub fn set_zone(&mut self, request: &ZoneRequest) -> Result<()> {
        match request.to_zone() {
            Ok(zone) => {
                self.replace_zone(zone);
                Ok(())
            }
            Err(e) => {
                warn!("⚠️ 区域更新被拒绝: {}", e);
                Err(e)
            }
        }
    }

    pub fn replace_zone(&mut self, zone: Zone) {
        info!("📐 监控区域更新: {:?}", zone);
        self.zone = Some(zone);
        self.editor.reset();
    }

    /// 回到全画面模式
    pub fn clear_zone(&mut self) {
        info!("📐 监控区域清除, 使用全画面");
        self.zone = None;
        self.editor.reset();
    }

    pub fn zone(&self) -> Option<&Zone> {
        self.zone.as_ref()
    }

    /// 点击添加多边形顶点; 点满 4 个即生效, 返回新区域
    pub fn click(&mut self, x: i32, y: i32) -> Result<Option<Zone>> {
        self.editor.click(x, y);
        match self.editor.complete() {
            Some(Ok(zone)) => {
                self.replace_zone(zone.clone());
                Ok(Some(zone))
            }
            Some(Err(e)) => {
                self.editor.reset();
                Err(e)
            }
            None => Ok(None),
        }
    }

    pub fn reset_clicks(&mut self) {
        self.editor.reset();
    }

    pub fn pending_clicks(&self) -> &[(i32, i32)] {
        self.editor.clicks()
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }
}
