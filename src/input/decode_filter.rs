/// FFmpeg解码过滤器模块
/// FFmpeg decode filter: YUV420P帧 → RgbImage → 有界通道
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct DecodeFilter {
    tx: Sender<RgbImage>,
    stop: Arc<AtomicBool>,
    pub count: usize,
    pub last: Instant,
    pub current_fps: f64,
    pub dropped_frames: usize, // 丢弃的帧数
    pub total_frames: usize,   // 总帧数
}

impl DecodeFilter {
    pub fn new(tx: Sender<RgbImage>, stop: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            stop,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, why: std::fmt::Arguments) {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            warn!("⚠️ 丢弃帧 #{}: {}", self.total_frames, why);
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(&mut self, frame: Frame, _ctx: &FrameFilterContext) -> Result<Option<Frame>, String> {
        // 帧源已释放, 结束解码
        if self.stop.load(Ordering::Relaxed) {
            return Err("source released".to_string());
        }

        self.total_frames += 1;

        // 基本检查：空帧或损坏帧
        if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
            self.drop_frame(format_args!("空帧/损坏帧"));
            return Ok(None);
        }

        // SAFETY: 指针已判空, 帧在本次回调内有效
        let raw = unsafe { &*frame.as_ptr() };
        let (w, h) = (raw.width as u32, raw.height as u32);

        // 检查分辨率合法性
        if w == 0 || h == 0 || w > 4096 || h > 4096 {
            self.drop_frame(format_args!("非法分辨率 {}x{}", w, h));
            return Ok(None);
        }

        // 只丢弃严重错误的帧 (缺少参考帧、无效比特流)
        if raw.decode_error_flags & 0x03 != 0 {
            self.drop_frame(format_args!("解码错误标志=0x{:02x}", raw.decode_error_flags));
            return Ok(None);
        }

        let (y_plane, u_plane, v_plane) = (raw.data[0], raw.data[1], raw.data[2]);
        let y_stride = raw.linesize[0] as usize;
        let uv_stride = raw.linesize[1] as usize;

        if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
            self.drop_frame(format_args!("YUV指针为空"));
            return Ok(None);
        }
        if y_stride < w as usize || uv_stride < (w as usize + 1) / 2 {
            self.drop_frame(format_args!("步长异常 y_stride={} uv_stride={}", y_stride, uv_stride));
            return Ok(None);
        }

        let mut rgb = vec![0u8; (w * h * 3) as usize];
        // SAFETY: 平面指针与步长已校验, 尺寸来自同一帧
        unsafe {
            yuv420p_to_rgb(
                y_plane,
                u_plane,
                v_plane,
                y_stride,
                uv_stride,
                &mut rgb,
                w as usize,
                h as usize,
            );
        }

        self.count += 1;
        if self.last.elapsed().as_secs_f64() >= 1.0 {
            let elapsed = self.last.elapsed().as_secs_f64();
            self.current_fps = self.count as f64 / elapsed;
            let drop_rate = self.dropped_frames as f64 / self.total_frames as f64 * 100.0;
            debug!(
                "📺 解码统计: 解码{}帧 | 实际{:.1}fps | 总帧{} | 丢弃{} ({:.1}%)",
                self.count, self.current_fps, self.total_frames, self.dropped_frames, drop_rate
            );
            self.last = Instant::now();
            self.count = 0;
        }

        if let Some(image) = RgbImage::from_raw(w, h, rgb) {
            match self.tx.try_send(image) {
                // 消费端跟不上时丢帧, 保证实时
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => return Err("receiver dropped".to_string()),
            }
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!("✅ 解码线程退出");
    }
}

/// YUV420P → RGB24 (BT.601 定点系数)
#[inline]
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgb(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let (r, g, b) = yuv_to_rgb(y_val, u_val, v_val);
            buffer[out_idx] = r;
            buffer[out_idx + 1] = g;
            buffer[out_idx + 2] = b;
            out_idx += 3;
        }
    }
}

#[inline]
fn yuv_to_rgb(y: i32, u: i32, v: i32) -> (u8, u8, u8) {
    (
        (y + ((v * 179) >> 7)).clamp(0, 255) as u8,
        (y - ((u * 44) >> 7) - ((v * 91) >> 7)).clamp(0, 255) as u8,
        (y + ((u * 227) >> 7)).clamp(0, 255) as u8,
    )
}
