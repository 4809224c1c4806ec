use crate::core::{PlayerError, Result, SampleFormat};
use crate::player::log_ctx;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// PCM 字节缓冲区（交错 i16，本机字节序）
///
/// 解码线程写入，cpal 回调线程读取。容量是软上限：
/// 缓冲区为空时任何大小的数据都可以写入，避免超大帧永远写不进去。
pub struct PcmBuffer {
    bytes: Mutex<VecDeque<u8>>,
    capacity: usize,
}

impl PcmBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Mutex::new(VecDeque::with_capacity(capacity.min(1 << 20))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 写入 `len` 字节后是否仍在容量之内
    pub fn fits(&self, len: usize) -> bool {
        let used = self.bytes.lock().len();
        used == 0 || used + len <= self.capacity
    }

    pub fn push(&self, data: &[u8]) {
        self.bytes.lock().extend(data.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }

    pub fn clear(&self) {
        self.bytes.lock().clear();
    }

    /// 填充 i16 输出，数据不足部分补静音
    pub fn fill_i16(&self, out: &mut [i16]) {
        let mut bytes = self.bytes.lock();
        for sample in out.iter_mut() {
            *sample = Self::pop_i16(&mut bytes).unwrap_or(0);
        }
    }

    /// 填充 f32 输出（设备不支持 i16 时使用）
    pub fn fill_f32(&self, out: &mut [f32]) {
        let mut bytes = self.bytes.lock();
        for sample in out.iter_mut() {
            *sample = Self::pop_i16(&mut bytes)
                .map(|s| s as f32 / 32768.0)
                .unwrap_or(0.0);
        }
    }

    fn pop_i16(bytes: &mut VecDeque<u8>) -> Option<i16> {
        if bytes.len() < 2 {
            return None;
        }
        let lo = bytes.pop_front()?;
        let hi = bytes.pop_front()?;
        Some(i16::from_ne_bytes([lo, hi]))
    }
}

/// 音频输出 - 使用 cpal 播放 PCM 缓冲区中的数据
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    buffer: Arc<PcmBuffer>,
}

// cpal::Stream 本身不是 Send，AudioOutput 只在音频解码线程和控制线程之间
// 通过 Mutex 串行访问，Stream 的回调线程由 cpal 自己管理
unsafe impl Send for AudioOutput {}

impl AudioOutput {
    /// 打开默认输出设备（设备不支持请求的配置时自动回退）
    ///
    /// `buffer` 由音频通路持有，输出只负责从中取数据。
    pub fn new(sample_rate: u32, channels: u16, buffer: Arc<PcmBuffer>) -> Result<Self> {
        info!("{} 初始化音频输出: {} Hz, {} 声道", log_ctx(), sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let supported: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
            .collect();

        let mut candidates = vec![(sample_rate, channels)];
        candidates.extend([
            (48000, 2),  // 最常见
            (44100, 2),  // CD 音质
            (48000, 1),
            (44100, 1),
        ]);

        let mut chosen = None;
        for (index, (rate, ch)) in candidates.into_iter().enumerate() {
            let config = StreamConfig {
                channels: ch,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            };
            if let Some(format) = Self::pick_sample_format(&config, &supported) {
                if index > 0 {
                    warn!(
                        "⚠️  音频设备不支持 {} Hz, {} 声道，回退到 {} Hz, {} 声道",
                        sample_rate, channels, rate, ch
                    );
                }
                chosen = Some((config, format));
                break;
            }
        }

        let (config, sample_format) = chosen.ok_or_else(|| {
            PlayerError::AudioError(format!(
                "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                sample_rate, channels
            ))
        })?;

        info!(
            "✅ 音频输出配置: {} Hz, {} 声道, {:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
            buffer,
        })
    }

    /// 在兼容的配置中选择采样格式，优先 i16
    fn pick_sample_format(
        config: &StreamConfig,
        supported: &[SupportedStreamConfigRange],
    ) -> Option<SampleFormat> {
        let compatible: Vec<&SupportedStreamConfigRange> = supported
            .iter()
            .filter(|range| Self::is_config_compatible(config, range))
            .collect();

        if compatible
            .iter()
            .any(|range| range.sample_format() == cpal::SampleFormat::I16)
        {
            Some(SampleFormat::I16)
        } else if compatible
            .iter()
            .any(|range| range.sample_format() == cpal::SampleFormat::F32)
        {
            Some(SampleFormat::F32)
        } else {
            None
        }
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        let channels_match = config.channels == supported.channels();

        rate_in_range && channels_match
    }

    /// 开始播放
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = self.buffer.clone();
        let on_error = |err: cpal::StreamError| error!("音频流错误: {}", err);

        let stream = match self.sample_format {
            SampleFormat::I16 => self.device.build_output_stream(
                &self.config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| buffer.fill_i16(data),
                on_error,
                None,
            ),
            SampleFormat::F32 => self.device.build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| buffer.fill_f32(data),
                on_error,
                None,
            ),
        }
        .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        self.stream = Some(stream);
        info!("{} 🔊 音频输出已启动", log_ctx());

        Ok(())
    }

    pub fn pause(&self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                warn!("暂停音频流失败: {}", e);
            }
        }
    }

    pub fn resume(&self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.play() {
                warn!("恢复音频流失败: {}", e);
            }
        }
    }

    /// 停止播放并丢弃尚未播放的数据
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("{} 🔇 音频输出已停止", log_ctx());
        }
        self.buffer.clear();
    }

    pub fn is_started(&self) -> bool {
        self.stream.is_some()
    }

    /// 获取实际使用的音频配置
    pub fn get_config(&self) -> (u32, u16) {
        (self.config.sample_rate.0, self.config.channels)
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
