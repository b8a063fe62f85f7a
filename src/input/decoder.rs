/// FFmpeg 帧源: RTSP主动拉流 / 本地摄像头
///
/// 解码在独立工作线程里运行, 帧通过有界通道交给 `read()`。
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use tracing::info;

use super::decode_filter::DecodeFilter;
use super::FrameSource;
use crate::error::{Result, SentinelError};

/// 解码通道容量: 只保留最新几帧
const FRAME_QUEUE: usize = 4;
/// 等待解码器启动结果的时长
const START_TIMEOUT: Duration = Duration::from_secs(10);
/// `read()` 单次等待上限
const READ_WAIT: Duration = Duration::from_millis(200);

pub struct FfmpegSource {
    name: String,
    rx: Receiver<RgbImage>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FfmpegSource {
    /// RTSP 流 (TCP 传输)
    pub fn rtsp(url: &str) -> Result<Self> {
        info!("🎬 RTSP解码器启动: {}", url);
        let input = Input::new(url).set_input_opts(
            [
                ("rtsp_transport", "tcp"),
                ("buffer_size", "67108864"),
                ("rtsp_flags", "prefer_tcp"),
            ]
            .into(),
        );
        Self::spawn(format!("rtsp:{url}"), input)
    }

    /// 本地摄像头 (DirectShow / AVFoundation / V4L2)
    pub fn camera(index: usize) -> Result<Self> {
        let (format, url) = camera_input(index)?;
        info!("📷 摄像头解码器启动: {} ({})", url, format);
        let input = Input::new(url.as_str())
            .set_format(format)
            .set_input_opts([("framerate", "30")].into());
        Self::spawn(format!("camera:{index}"), input)
    }

    fn spawn(name: String, input: Input) -> Result<Self> {
        let (tx, rx) = bounded(FRAME_QUEUE);
        let (status_tx, status_rx) = bounded::<std::result::Result<(), String>>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let filter = DecodeFilter::new(tx, Arc::clone(&stop));

        let worker = std::thread::Builder::new()
            .name(format!("decode-{name}"))
            .spawn(move || {
                // 构建帧处理管线; 统一转成 yuv420p 交给过滤器
                let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
                let pipe = pipe.filter("decode", Box::new(filter));
                let out = create_null_output().add_frame_pipeline(pipe);

                let ctx = FfmpegContext::builder()
                    .input(input)
                    .filter_descs(["format=yuv420p"].into())
                    .output(out)
                    .build();
                let ctx = match ctx {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = status_tx.send(Err(format!("构建失败: {e}")));
                        return;
                    }
                };
                let sch = match ctx.start() {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = status_tx.send(Err(format!("启动失败: {e}")));
                        return;
                    }
                };
                let _ = status_tx.send(Ok(()));

                let _ = sch.wait();
                info!("📹 解码循环结束");
            })
            .map_err(|e| SentinelError::FatalInit(format!("decoder thread: {e}")))?;

        match status_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                info!("✅ {} 连接成功,开始解码!", name);
                Ok(Self {
                    name,
                    rx,
                    stop,
                    worker: Some(worker),
                })
            }
            Ok(Err(message)) => {
                let _ = worker.join();
                Err(SentinelError::FatalInit(format!("{name}: {message}")))
            }
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                Err(SentinelError::FatalInit(format!("{name}: 启动超时")))
            }
        }
    }
}

impl FrameSource for FfmpegSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Option<RgbImage> {
        if self.worker.is_none() {
            return None;
        }
        // 取最新一帧, 丢掉积压
        let mut latest = self.rx.recv_timeout(READ_WAIT).ok()?;
        while let Ok(frame) = self.rx.try_recv() {
            latest = frame;
        }
        Some(latest)
    }

    fn release(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.stop.store(true, Ordering::SeqCst);
            // 不等待解码线程: 下一帧到达时过滤器自行退出
            drop(worker);
            info!("🛑 帧源已释放: {}", self.name);
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// 按平台选择摄像头输入格式和地址
fn camera_input(index: usize) -> Result<(&'static str, String)> {
    #[cfg(target_os = "windows")]
    {
        // dshow 按设备名打开
        let devices = ez_ffmpeg::device::get_input_video_devices()
            .map_err(|e| SentinelError::FatalInit(format!("获取摄像头列表失败: {e}")))?;
        let name = devices
            .into_iter()
            .nth(index)
            .ok_or_else(|| SentinelError::FatalInit(format!("摄像头 #{index} 不存在")))?;
        Ok(("dshow", format!("video={name}")))
    }
    #[cfg(target_os = "macos")]
    {
        Ok(("avfoundation", format!("{index}")))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let path = format!("/dev/video{index}");
        if !std::path::Path::new(&path).exists() {
            tracing::warn!("⚠️ 摄像头设备不存在: {}", path);
            return Err(SentinelError::FatalInit(format!("{path} not found")));
        }
        Ok(("v4l2", path))
    }
}
