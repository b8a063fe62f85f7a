//! 告警音
//!
//! 播放是"发出即忘": 调用方不等待播放结束, 设备不可用时只记日志。

use std::path::Path;

use tracing::warn;

use crate::error::Result;

pub trait AlertSound: Send {
    fn play(&self) -> Result<()>;
}

/// 无声 (无音频设备 / 未启用 audio 特性)
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSound;

impl AlertSound for SilentSound {
    fn play(&self) -> Result<()> {
        Ok(())
    }
}

/// 根据配置加载告警音, 失败时退化为无声
pub fn load(path: Option<&Path>) -> Box<dyn AlertSound> {
    let Some(path) = path else {
        return Box::new(SilentSound);
    };

    #[cfg(feature = "audio")]
    {
        match wav::WavSound::load(path) {
            Ok(sound) => return Box::new(sound),
            Err(e) => warn!("⚠️ 告警音加载失败 {}: {}, 告警将静音", path.display(), e),
        }
    }
    #[cfg(not(feature = "audio"))]
    warn!(
        "⚠️ 未启用 audio 特性, 忽略告警音 {}",
        path.display()
    );

    Box::new(SilentSound)
}

#[cfg(feature = "audio")]
pub mod wav {
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{debug, warn};

    use super::AlertSound;
    use crate::error::{Result, SentinelError};

    /// WAV 告警音 (hound 解码, cpal 播放)
    pub struct WavSound {
        samples: Arc<Vec<f32>>,
        channels: u16,
        sample_rate: u32,
        playing: Arc<AtomicBool>,
    }

    impl WavSound {
        pub fn load(path: &Path) -> anyhow::Result<Self> {
            let mut reader = hound::WavReader::open(path)?;
            let spec = reader.spec();
            let samples: Vec<f32> = match spec.sample_format {
                hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
                hound::SampleFormat::Int => {
                    let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                    reader
                        .samples::<i32>()
                        .map(|s| s.map(|v| v as f32 / max))
                        .collect::<Result<_, _>>()?
                }
            };
            debug!(
                "alert sound loaded: {} samples, {} ch, {} Hz",
                samples.len(),
                spec.channels,
                spec.sample_rate
            );
            Ok(Self {
                samples: Arc::new(samples),
                channels: spec.channels,
                sample_rate: spec.sample_rate,
                playing: Arc::new(AtomicBool::new(false)),
            })
        }

        fn duration(&self) -> Duration {
            let frames = self.samples.len() as f64 / self.channels.max(1) as f64;
            Duration::from_secs_f64(frames / self.sample_rate.max(1) as f64)
        }
    }

    impl AlertSound for WavSound {
        fn play(&self) -> Result<()> {
            // 正在播放时不叠加
            if self.playing.swap(true, Ordering::SeqCst) {
                return Ok(());
            }

            let device = match cpal::default_host().default_output_device() {
                Some(d) => d,
                None => {
                    self.playing.store(false, Ordering::SeqCst);
                    return Err(SentinelError::side_effect("sound", "no output device"));
                }
            };

            let samples = Arc::clone(&self.samples);
            let playing = Arc::clone(&self.playing);
            let src_channels = self.channels.max(1) as usize;
            let sample_rate = self.sample_rate;
            let hold = self.duration() + Duration::from_millis(100);

            // cpal::Stream 不是 Send, 在播放线程里创建并持有
            std::thread::spawn(move || {
                let config = cpal::StreamConfig {
                    channels: src_channels as u16,
                    sample_rate: cpal::SampleRate(sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                let mut cursor = 0usize;
                let data = Arc::clone(&samples);
                let stream = device.build_output_stream(
                    &config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for sample in out.iter_mut() {
                            *sample = data.get(cursor).copied().unwrap_or(0.0);
                            cursor += 1;
                        }
                    },
                    |e| warn!("❌ 告警音播放错误: {}", e),
                    None,
                );
                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            warn!("❌ 告警音播放失败: {}", e);
                        } else {
                            std::thread::sleep(hold);
                        }
                    }
                    Err(e) => warn!("❌ 音频输出流创建失败: {}", e),
                }
                playing.store(false, Ordering::SeqCst);
            });
            Ok(())
        }
    }
}
