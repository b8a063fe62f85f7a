//! 单路监控 (Monitor) 与推流会话 (StreamSession)
//!
//! 每路摄像头一个 Monitor: 帧源 → 分析引擎 → 告警状态机。
//! 多个观看者共享同一个 Monitor, 通过互斥锁串行化拉帧。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::alert::{AlertAction, AlertMachine};
use crate::analytics::{AnalyticsEngine, Verdict};
use crate::error::{Result, SentinelError};
use crate::input::FrameSource;

pub type SharedMonitor = Arc<Mutex<Monitor>>;

/// 随帧返回的元数据
#[derive(Clone, Debug)]
pub struct FrameStamp {
    pub seq: u64,
    pub timestamp: DateTime<Local>,
    /// 检测失败时为 None, 此时交付的是原始帧
    pub verdict: Option<Verdict>,
    pub alert: Option<AlertAction>,
    pub recording: bool,
}

pub struct Monitor {
    source: Box<dyn FrameSource>,
    engine: AnalyticsEngine,
    alerts: AlertMachine,
    seq: u64,
    detector_errors: u64,
    released: bool,
}

impl Monitor {
    pub fn new(source: Box<dyn FrameSource>, engine: AnalyticsEngine, alerts: AlertMachine) -> Self {
        info!(
            "🛰️ 监控启动: 帧源={} 策略={}",
            source.name(),
            engine.policy_name()
        );
        Self {
            source,
            engine,
            alerts,
            seq: 0,
            detector_errors: 0,
            released: false,
        }
    }

    pub fn shared(self) -> SharedMonitor {
        Arc::new(Mutex::new(self))
    }

    /// 从帧源取一帧并处理; 无帧返回 None
    pub fn pull(&mut self) -> Option<(RgbImage, FrameStamp)> {
        if self.released {
            return None;
        }
        let frame = self.source.read()?;
        Some(self.process(frame, Instant::now()))
    }

    /// 检测 → 判定 → 告警。检测失败时记录日志并原样交付。
    pub fn process(&mut self, frame: RgbImage, now: Instant) -> (RgbImage, FrameStamp) {
        self.seq += 1;
        // 录像期间必须每帧检测
        let force_detect = self.alerts.is_recording();

        let (image, verdict, alert, recording) = match self.engine.analyze_with(&frame, force_detect) {
            Ok((mut annotated, verdict)) => {
                let outcome = self.alerts.observe(&verdict, &mut annotated, now);
                (annotated, Some(verdict), Some(outcome.action), outcome.recording)
            }
            Err(e) => {
                self.detector_errors += 1;
                if self.detector_errors <= 10 || self.detector_errors % 100 == 0 {
                    warn!("⚠️ 检测失败 (第{}次), 交付原始帧: {}", self.detector_errors, e);
                }
                // 无判定也要推进录像计时, 否则录像永远不会结束
                let recording = self.alerts.tick(&frame, now);
                (frame, None, None, recording)
            }
        };

        let stamp = FrameStamp {
            seq: self.seq,
            timestamp: Local::now(),
            verdict,
            alert,
            recording,
        };
        (image, stamp)
    }

    pub fn engine(&self) -> &AnalyticsEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AnalyticsEngine {
        &mut self.engine
    }

    pub fn alerts(&self) -> &AlertMachine {
        &self.alerts
    }

    pub fn is_shut_down(&self) -> bool {
        self.released
    }

    /// 释放帧源并结束录像, 只生效一次
    pub fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.alerts.shutdown();
        self.source.release();
        info!("🛑 监控已关闭 (共处理 {} 帧)", self.seq);
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 锁中毒时仍然取回内部状态, 保证视频流不断
pub fn lock(monitor: &SharedMonitor) -> MutexGuard<'_, Monitor> {
    monitor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 单个观看者的拉流会话
pub struct StreamSession {
    monitor: SharedMonitor,
    attempts: u32,
    backoff: Duration,
    cancelled: Arc<AtomicBool>,
    delivered: u64,
}

impl StreamSession {
    pub fn new(monitor: SharedMonitor, attempts: u32, backoff: Duration) -> Self {
        Self {
            monitor,
            attempts: attempts.max(1),
            backoff,
            cancelled: Arc::new(AtomicBool::new(false)),
            delivered: 0,
        }
    }

    /// 取消句柄, 可跨线程调用
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// 取下一帧标注画面; 无帧时有限次重试
    pub fn next_annotated_frame(&mut self) -> Result<(RgbImage, FrameStamp)> {
        for attempt in 1..=self.attempts {
            if self.is_cancelled() {
                return Err(SentinelError::Cancelled);
            }
            {
                let mut monitor = lock(&self.monitor);
                if monitor.is_shut_down() {
                    return Err(SentinelError::Cancelled);
                }
                if let Some(out) = monitor.pull() {
                    self.delivered += 1;
                    return Ok(out);
                }
            }
            if attempt < self.attempts {
                std::thread::sleep(self.backoff);
            }
        }
        debug!("no frame after {} attempts", self.attempts);
        Err(SentinelError::SourceUnavailable {
            attempts: self.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::recorder::tests::CountingSink;
    use crate::alert::{AlertProfile, EvidenceStore};
    use crate::analytics::policy::tests::{person_at, FixedDetector};
    use crate::analytics::{MotionConfig, MotionPolicy, OccupancyConfig, OccupancyPolicy, Overlay};
    use crate::detection::{Detection, Detector};
    use crate::input::tests::ScriptedSource;
    use image::Rgb;

    struct BrokenDetector;

    impl Detector for BrokenDetector {
        fn name(&self) -> &str {
            "broken"
        }

        fn infer(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
            anyhow::bail!("inference backend crashed")
        }
    }

    /// 前 `healthy` 次推理正常, 之后一直失败
    struct FlakyDetector {
        healthy: usize,
        calls: usize,
    }

    impl Detector for FlakyDetector {
        fn name(&self) -> &str {
            "flaky"
        }

        fn infer(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
            self.calls += 1;
            if self.calls > self.healthy {
                anyhow::bail!("inference backend lost")
            }
            Ok(vec![person_at(80.0, 60.0, 0.9)])
        }
    }

    fn monitor_with(
        source: ScriptedSource,
        detector: Box<dyn Detector>,
        dir: &std::path::Path,
    ) -> Monitor {
        let overlay = Arc::new(Overlay::without_text());
        let engine = AnalyticsEngine::new(
            detector,
            Box::new(OccupancyPolicy::new(OccupancyConfig::default())),
            Arc::clone(&overlay),
        );
        let alerts = AlertMachine::new(
            AlertProfile::crowd(Duration::from_secs(5)),
            EvidenceStore::open(dir).unwrap(),
            overlay,
        );
        Monitor::new(Box::new(source), engine, alerts)
    }

    fn frames(script: &[bool]) -> Vec<Option<RgbImage>> {
        script
            .iter()
            .map(|present| present.then(|| RgbImage::new(64, 48)))
            .collect()
    }

    #[test]
    fn test_retry_until_frame_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(frames(&[false, false, true]));
        let monitor = monitor_with(source, Box::new(FixedDetector::new(vec![])), dir.path()).shared();
        let mut session = StreamSession::new(monitor, 10, Duration::from_millis(1));
        let (_, stamp) = session.next_annotated_frame().unwrap();
        assert_eq!(stamp.seq, 1);
        assert_eq!(session.delivered(), 1);
    }

    #[test]
    fn test_bounded_retry_gives_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(frames(&[false; 3]));
        let monitor = monitor_with(source, Box::new(FixedDetector::new(vec![])), dir.path()).shared();
        let mut session = StreamSession::new(monitor, 5, Duration::from_millis(1));
        assert!(matches!(
            session.next_annotated_frame(),
            Err(SentinelError::SourceUnavailable { attempts: 5 })
        ));
    }

    #[test]
    fn test_cancel_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(frames(&[true]));
        let monitor = monitor_with(source, Box::new(FixedDetector::new(vec![])), dir.path()).shared();
        let mut session = StreamSession::new(monitor, 5, Duration::from_millis(1));
        session.cancel();
        assert!(matches!(session.next_annotated_frame(), Err(SentinelError::Cancelled)));
    }

    #[test]
    fn test_detector_failure_delivers_raw_frame() {
        let dir = tempfile::tempdir().unwrap();
        let raw = RgbImage::from_pixel(64, 48, Rgb([1, 2, 3]));
        let source = ScriptedSource::new(vec![Some(raw.clone())]);
        let mut monitor = monitor_with(source, Box::new(BrokenDetector), dir.path());
        let (image, stamp) = monitor.pull().unwrap();
        assert_eq!(image, raw);
        assert!(stamp.verdict.is_none());
    }

    #[test]
    fn test_viewers_share_alert_state() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(frames(&[true, true]));
        let detector = FixedDetector::new(vec![person_at(20.0, 20.0, 0.9)]);
        let monitor = monitor_with(source, Box::new(detector), dir.path()).shared();

        let mut a = StreamSession::new(Arc::clone(&monitor), 3, Duration::from_millis(1));
        let mut b = StreamSession::new(Arc::clone(&monitor), 3, Duration::from_millis(1));
        let (_, first) = a.next_annotated_frame().unwrap();
        let (_, second) = b.next_annotated_frame().unwrap();
        assert_eq!(first.alert, Some(AlertAction::Fired));
        // 第二个观看者看到的是同一冷却期
        assert_eq!(second.alert, Some(AlertAction::Suppressed));
        assert_eq!(lock(&monitor).alerts().fired_count(), 1);
    }

    #[test]
    fn test_shutdown_releases_source_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(frames(&[true, true]));
        let releases = Arc::clone(&source.releases);
        let monitor = monitor_with(source, Box::new(FixedDetector::new(vec![])), dir.path()).shared();
        let mut session = StreamSession::new(Arc::clone(&monitor), 3, Duration::from_millis(1));

        lock(&monitor).shutdown();
        lock(&monitor).shutdown();
        assert!(matches!(session.next_annotated_frame(), Err(SentinelError::Cancelled)));
        drop(session);
        drop(monitor);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_motion_episode_records_through_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = Arc::new(Overlay::without_text());
        // 第一帧建立参考, 第二帧大面积变化触发运动, 第三帧静止
        let script = vec![
            Some(RgbImage::from_pixel(160, 120, Rgb([0, 0, 0]))),
            Some(RgbImage::from_pixel(160, 120, Rgb([255, 255, 255]))),
            Some(RgbImage::from_pixel(160, 120, Rgb([255, 255, 255]))),
        ];
        let engine = AnalyticsEngine::new(
            Box::new(FixedDetector::new(vec![person_at(80.0, 60.0, 0.9)])),
            Box::new(MotionPolicy::new(MotionConfig::default())),
            Arc::clone(&overlay),
        );
        let sink = CountingSink::default();
        let alerts = AlertMachine::new(
            AlertProfile::motion(Duration::from_secs(3), 20.0),
            EvidenceStore::open(dir.path()).unwrap(),
            overlay,
        )
        .with_clip_sink(Box::new(sink.clone()));
        let mut monitor = Monitor::new(Box::new(ScriptedSource::new(script)), engine, alerts);

        let (_, s1) = monitor.pull().unwrap();
        assert!(!s1.recording);
        let (_, s2) = monitor.pull().unwrap();
        assert!(s2.recording);
        let (_, s3) = monitor.pull().unwrap();
        assert!(s3.recording);
        assert_eq!(sink.written.load(Ordering::SeqCst), 2);

        monitor.shutdown();
        assert_eq!(sink.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recording_ends_when_detector_fails_mid_episode() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = Arc::new(Overlay::without_text());
        let engine = AnalyticsEngine::new(
            Box::new(FlakyDetector { healthy: 1, calls: 0 }),
            Box::new(MotionPolicy::new(MotionConfig::default())),
            Arc::clone(&overlay),
        );
        let sink = CountingSink::default();
        let alerts = AlertMachine::new(
            AlertProfile::motion(Duration::from_secs(3), 20.0),
            EvidenceStore::open(dir.path()).unwrap(),
            overlay,
        )
        .with_clip_sink(Box::new(sink.clone()));
        let mut monitor = Monitor::new(Box::new(ScriptedSource::new(vec![])), engine, alerts);

        let black = RgbImage::from_pixel(160, 120, Rgb([0, 0, 0]));
        let white = RgbImage::from_pixel(160, 120, Rgb([255, 255, 255]));
        let t0 = Instant::now();

        monitor.process(black, t0);
        let (_, opened) = monitor.process(white.clone(), t0 + Duration::from_millis(100));
        assert!(opened.recording);

        // 检测开始失败: 尾巴期内继续录原始帧
        let (_, failing) = monitor.process(white.clone(), t0 + Duration::from_secs(1));
        assert!(failing.verdict.is_none());
        assert!(failing.recording);
        assert_eq!(sink.written.load(Ordering::SeqCst), 2);

        // 尾巴过期后即使一直没有判定也要关闭
        let (_, expired) = monitor.process(white.clone(), t0 + Duration::from_secs(4));
        assert!(expired.verdict.is_none());
        assert!(!expired.recording);
        assert!(!monitor.alerts().is_recording());
        assert_eq!(sink.opened.load(Ordering::SeqCst), 1);
        assert_eq!(sink.closed.load(Ordering::SeqCst), 1);

        let (_, later) = monitor.process(white, t0 + Duration::from_secs(13));
        assert!(!later.recording);
        assert_eq!(sink.closed.load(Ordering::SeqCst), 1);
    }
}
