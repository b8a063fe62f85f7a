//! 告警/录像状态机
//!
//! IDLE → ACTIVE → (COOLDOWN) → IDLE, 录像为 ACTIVE 内的子状态。
//! 所有时间比较都基于 `Instant` 的经过时长。
//! 画面提示永远不受抑制, 只有声音/截图/录像/事件受节奏控制。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam_channel::{Sender, TrySendError};
use image::RgbImage;
use tracing::{debug, info, warn};

use super::evidence::EvidenceStore;
use super::recorder::{ClipSink, MjpegClipSink, RecordingSession};
use super::sound::{AlertSound, SilentSound};
use super::{AlertEvent, AlertPolicy, AlertProfile};
use crate::analytics::overlay::{Overlay, HEADER_HEIGHT, RED};
use crate::analytics::Verdict;

/// 本帧状态机做了什么
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AlertAction {
    /// 非告警帧
    Idle,
    /// 本帧触发了告警动作 (声音/证据/事件)
    Fired,
    /// 告警帧, 但处于冷却期内
    Suppressed,
    /// 连续告警中, 尚未升级
    Warning { elapsed: Duration },
    /// 已升级, 动作已在本轮触发过
    Escalated { elapsed: Duration },
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlertOutcome {
    pub action: AlertAction,
    pub recording: bool,
    pub evidence: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertPhase {
    Idle,
    Active,
    Cooldown,
}

pub struct AlertMachine {
    profile: AlertProfile,
    evidence: EvidenceStore,
    overlay: Arc<Overlay>,
    sound: Box<dyn AlertSound>,
    clips: Box<dyn ClipSink>,
    events: Option<Sender<AlertEvent>>,

    // 冷却模式
    last_fired: Option<Instant>,

    // 持续计时模式
    active_since: Option<Instant>,
    escalated: bool,

    // 录像子状态
    session: Option<RecordingSession>,
    last_qualifying: Option<Instant>,
    record_failed: bool,

    // 统计
    fired_count: u64,
    suppressed_count: u64,
}

impl AlertMachine {
    pub fn new(profile: AlertProfile, evidence: EvidenceStore, overlay: Arc<Overlay>) -> Self {
        info!("🚨 告警状态机: {:?} {:?}", profile.kind, profile.policy);
        Self {
            profile,
            evidence,
            overlay,
            sound: Box::new(SilentSound),
            clips: Box::new(MjpegClipSink::default()),
            events: None,
            last_fired: None,
            active_since: None,
            escalated: false,
            session: None,
            last_qualifying: None,
            record_failed: false,
            fired_count: 0,
            suppressed_count: 0,
        }
    }

    pub fn with_sound(mut self, sound: Box<dyn AlertSound>) -> Self {
        self.sound = sound;
        self
    }

    pub fn with_clip_sink(mut self, clips: Box<dyn ClipSink>) -> Self {
        self.clips = clips;
        self
    }

    pub fn with_events(mut self, events: Sender<AlertEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn profile(&self) -> &AlertProfile {
        &self.profile
    }

    /// 处理一帧的判定结果, 在 `frame` 上叠加告警提示并执行副作用
    pub fn observe(&mut self, verdict: &Verdict, frame: &mut RgbImage, now: Instant) -> AlertOutcome {
        match self.profile.policy {
            AlertPolicy::Cooldown { cooldown } => self.observe_cooldown(verdict, frame, now, cooldown),
            AlertPolicy::Sustained { warning, recording } => {
                self.observe_sustained(verdict, frame, now, warning, recording)
            }
        }
    }

    fn observe_cooldown(
        &mut self,
        verdict: &Verdict,
        frame: &mut RgbImage,
        now: Instant,
        cooldown: Duration,
    ) -> AlertOutcome {
        if !verdict.qualifies {
            return self.outcome(AlertAction::Idle, None);
        }

        // 冷却计时从最后一次触发开始, 非告警帧不会提前重置
        let ready = self
            .last_fired
            .map_or(true, |t| now.saturating_duration_since(t) > cooldown);
        if !ready {
            self.suppressed_count += 1;
            debug!("alert suppressed by cooldown ({} so far)", self.suppressed_count);
            return self.outcome(AlertAction::Suppressed, None);
        }

        self.last_fired = Some(now);
        let evidence = self.fire(verdict, Some(&*frame), None);
        self.outcome(AlertAction::Fired, evidence)
    }

    fn observe_sustained(
        &mut self,
        verdict: &Verdict,
        frame: &mut RgbImage,
        now: Instant,
        warning: Option<Duration>,
        recording: Option<Duration>,
    ) -> AlertOutcome {
        let mut action = AlertAction::Idle;
        let mut evidence = None;

        if verdict.qualifies {
            let since = *self.active_since.get_or_insert(now);
            let elapsed = now.saturating_duration_since(since);
            action = AlertAction::Warning { elapsed };

            if let Some(warning) = warning {
                self.overlay.draw_line(
                    frame,
                    &format!("WARNING: {}s", elapsed.as_secs()),
                    20,
                    HEADER_HEIGHT as i32 + 20,
                    32.0,
                    RED,
                );
                if elapsed >= warning {
                    self.overlay.draw_line(
                        frame,
                        "!!! CLEAR THE AREA !!!",
                        (frame.width() / 4) as i32,
                        (frame.height() / 2) as i32,
                        48.0,
                        RED,
                    );
                    if self.escalated {
                        action = AlertAction::Escalated { elapsed };
                    } else {
                        self.escalated = true;
                        evidence = self.fire(verdict, Some(&*frame), None);
                        action = AlertAction::Fired;
                    }
                }
            }
        } else {
            // 任何一帧非告警都把连续计时清零 (无宽限期)
            if self.active_since.take().is_some() {
                debug!("sustained episode reset");
            }
            self.escalated = false;
        }

        if let Some(tail) = recording {
            if let Some(clip) = self.record(verdict, frame, now, tail) {
                evidence = Some(clip);
                action = AlertAction::Fired;
            }
        }

        self.outcome(action, evidence)
    }

    /// 录像子状态; 新开录像时返回录像路径
    fn record(&mut self, verdict: &Verdict, frame: &mut RgbImage, now: Instant, tail: Duration) -> Option<PathBuf> {
        let mut opened = None;

        if verdict.qualifies {
            self.last_qualifying = Some(now);
            if self.session.is_none() && !self.record_failed {
                let path = self.evidence.clip_path(&self.profile.evidence_prefix);
                let (w, h) = frame.dimensions();
                match RecordingSession::open(self.clips.as_mut(), path.clone(), w, h, self.profile.clip_fps, now) {
                    Ok(session) => {
                        self.session = Some(session);
                        self.fire(verdict, None, Some(path.clone()));
                        opened = Some(path);
                    }
                    Err(e) => {
                        // 本轮只检测不录像
                        warn!("⚠️ 无法开始录像, 本轮告警不录像: {}", e);
                        self.record_failed = true;
                    }
                }
            }
        }

        if self.session.is_some() && self.recently_active(now, tail) {
            self.overlay
                .draw_line(frame, "REC: MOVING PERSON", 20, HEADER_HEIGHT as i32 + 60, 32.0, RED);
        }
        self.age_recording(frame, now, tail);

        opened
    }

    fn recently_active(&self, now: Instant, tail: Duration) -> bool {
        self.last_qualifying
            .map_or(false, |t| now.saturating_duration_since(t) < tail)
    }

    /// 尾巴期内继续写帧, 超过尾巴关闭录像
    fn age_recording(&mut self, frame: &RgbImage, now: Instant, tail: Duration) {
        if self.recently_active(now, tail) {
            if let Some(session) = self.session.as_mut() {
                session.touch(now);
                session.append(frame);
            }
        } else {
            if let Some(mut session) = self.session.take() {
                session.close();
            }
            self.record_failed = false;
        }
    }

    /// 没有判定结果的帧 (检测失败): 按非告警帧推进计时。
    ///
    /// 连续计时清零, 录像在尾巴期内照常写入原始帧, 超时后关闭。
    /// 返回之后是否仍在录像。
    pub fn tick(&mut self, frame: &RgbImage, now: Instant) -> bool {
        if let AlertPolicy::Sustained { recording, .. } = self.profile.policy {
            if self.active_since.take().is_some() {
                debug!("sustained episode reset (no verdict)");
            }
            self.escalated = false;
            if let Some(tail) = recording {
                self.age_recording(frame, now, tail);
            }
        }
        self.session.is_some()
    }

    /// 执行告警动作: 声音 → 截图 → 事件。任何一步失败都只记日志。
    fn fire(&mut self, verdict: &Verdict, snapshot: Option<&RgbImage>, clip: Option<PathBuf>) -> Option<PathBuf> {
        self.fired_count += 1;
        info!(
            "🚨 告警 #{}: {:?} {}",
            self.fired_count,
            self.profile.kind,
            verdict.reason()
        );

        if let Err(e) = self.sound.play() {
            warn!("🔇 告警音不可用, 跳过: {}", e);
        }

        let evidence = match snapshot {
            Some(frame) => self.evidence.snapshot(&self.profile.evidence_prefix, frame).ok(),
            None => clip,
        };

        self.emit(AlertEvent {
            kind: self.profile.kind,
            message: self.profile.message.clone(),
            reason: verdict.reason(),
            timestamp: Local::now(),
            evidence: evidence.clone(),
        });
        evidence
    }

    fn emit(&self, event: AlertEvent) {
        if let Some(tx) = &self.events {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("alert event dropped: channel full"),
                Err(TrySendError::Disconnected(_)) => debug!("alert event dropped: no listener"),
            }
        }
    }

    fn outcome(&self, action: AlertAction, evidence: Option<PathBuf>) -> AlertOutcome {
        AlertOutcome {
            action,
            recording: self.session.is_some(),
            evidence,
        }
    }

    pub fn phase(&self, now: Instant) -> AlertPhase {
        match self.profile.policy {
            AlertPolicy::Cooldown { cooldown } => match self.last_fired {
                Some(t) if now.saturating_duration_since(t) <= cooldown => AlertPhase::Cooldown,
                _ => AlertPhase::Idle,
            },
            AlertPolicy::Sustained { .. } => {
                if self.active_since.is_some() {
                    AlertPhase::Active
                } else if self.session.is_some() {
                    AlertPhase::Cooldown
                } else {
                    AlertPhase::Idle
                }
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn fired_count(&self) -> u64 {
        self.fired_count
    }

    /// 关闭任何未结束的录像 (可重复调用)
    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            info!("🛑 关闭中, 结束录像: {}", session.path().display());
            session.close();
        }
        self.active_since = None;
        self.escalated = false;
    }
}

impl Drop for AlertMachine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
