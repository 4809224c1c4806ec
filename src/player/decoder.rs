use crate::core::{AudioFrame, PixelFormat, PlayerError, Result, SampleFormat, VideoFrame};
use crate::player::log_ctx;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, software, util};
use log::{debug, info, warn};

/// "需要更多输入"
const EAGAIN: i32 = 11;

fn time_base_secs(stream: &format::stream::Stream) -> f64 {
    let tb = stream.time_base();
    if tb.denominator() == 0 {
        0.0
    } else {
        tb.numerator() as f64 / tb.denominator() as f64
    }
}

/// 视频解码器：解码并转换为 RGBA
pub struct VideoDecoder {
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    input: (util::format::Pixel, u32, u32),
    time_base: f64,
}

// SwsContext 本身不是 Send，但解码器实例在 Play 时整体移入解码线程，之后只在该线程中使用
unsafe impl Send for VideoDecoder {}

impl VideoDecoder {
    /// 从视频流创建解码器，同时准备好像素格式转换器
    pub fn from_stream(stream: format::stream::Stream) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;
        let time_base = time_base_secs(&stream);

        let input = (decoder.format(), decoder.width(), decoder.height());
        info!(
            "{} 视频解码器: {}x{}, 格式: {:?}",
            log_ctx(),
            input.1,
            input.2,
            input.0
        );

        // 部分编码器要到第一帧才知道像素格式，这种情况下延后创建转换器
        let scaler = if input.0 == util::format::Pixel::None || input.1 == 0 || input.2 == 0 {
            None
        } else {
            Some(Self::build_scaler(input)?)
        };

        Ok(Self {
            decoder,
            scaler,
            input,
            time_base,
        })
    }

    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    pub fn height(&self) -> u32 {
        self.decoder.height()
    }

    fn build_scaler(
        (format, width, height): (util::format::Pixel, u32, u32),
    ) -> Result<software::scaling::Context> {
        software::scaling::Context::get(
            format,
            width,
            height,
            util::format::Pixel::RGBA,
            width,
            height,
            software::scaling::Flags::FAST_BILINEAR,
        )
        .map_err(|e| PlayerError::ConvertError(format!("创建像素格式转换器失败: {}", e)))
    }

    /// 解码数据包
    ///
    /// 解码错误返回 `DecodeError`（丢弃本包即可），转换错误返回 `ConvertError`。
    pub fn decode(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<VideoFrame>> {
        let mut frames = Vec::new();

        loop {
            match self.decoder.send_packet(packet) {
                Ok(()) => break,
                Err(ffmpeg::Error::Other { errno: EAGAIN }) => {
                    // 解码器输出已满，先取走已有的帧再重新送入
                    let before = frames.len();
                    self.receive_frames(&mut frames)?;
                    if frames.len() == before {
                        return Err(PlayerError::DecodeError(
                            "视频解码器拒绝输入且没有可输出的帧".to_string(),
                        ));
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    debug!("视频解码器收到 EOF（send_packet），忽略本次包");
                    return Ok(frames);
                }
                Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
            }
        }

        self.receive_frames(&mut frames)?;
        Ok(frames)
    }

    /// 刷新解码器（取出缓冲的帧）
    pub fn flush(&mut self) -> Result<Vec<VideoFrame>> {
        let mut frames = Vec::new();
        if let Err(e) = self.decoder.send_eof() {
            debug!("视频解码器 send_eof 失败: {}", e);
            return Ok(frames);
        }
        self.receive_frames(&mut frames)?;
        self.decoder.flush();
        Ok(frames)
    }

    fn receive_frames(&mut self, frames: &mut Vec<VideoFrame>) -> Result<()> {
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => frames.push(self.convert_frame(&decoded)?),
                Err(ffmpeg::Error::Other { errno: EAGAIN }) => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("视频解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    /// 转换帧格式为 RGBA，行间无填充
    fn convert_frame(&mut self, frame: &util::frame::Video) -> Result<VideoFrame> {
        let width = frame.width();
        let height = frame.height();
        let input = (frame.format(), width, height);

        if self.scaler.is_none() || input != self.input {
            if self.scaler.is_some() {
                info!(
                    "🔧 视频尺寸/格式变化 {:?} → {:?}，重建转换器",
                    self.input, input
                );
            }
            self.scaler = Some(Self::build_scaler(input)?);
            self.input = input;
        }

        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| PlayerError::ConvertError("像素格式转换器不可用".to_string()))?;

        let mut rgba_frame = util::frame::Video::empty();
        scaler
            .run(frame, &mut rgba_frame)
            .map_err(|e| PlayerError::ConvertError(format!("像素格式转换失败: {}", e)))?;

        let pts = frame.timestamp().map(|ts| ts as f64 * self.time_base);

        let row_size = width as usize * PixelFormat::RGBA.bytes_per_pixel();
        let mut data = vec![0u8; row_size * height as usize];

        let stride = rgba_frame.stride(0);
        let frame_data = rgba_frame.data(0);

        for y in 0..height as usize {
            let src_offset = y * stride;
            let dst_offset = y * row_size;
            data[dst_offset..dst_offset + row_size]
                .copy_from_slice(&frame_data[src_offset..src_offset + row_size]);
        }

        Ok(VideoFrame {
            pts,
            width,
            height,
            format: PixelFormat::RGBA,
            data,
        })
    }
}

/// 音频解码器：解码并重采样为交错 i16
pub struct AudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: software::resampling::Context,
    input: (util::format::Sample, u32, u16),
    time_base: f64,
    target_channels: u16,
    target_sample_rate: u32,
}

// SwrContext 同上，只在解码线程中使用
unsafe impl Send for AudioDecoder {}

impl AudioDecoder {
    /// 从音频流创建解码器（指定目标配置）
    pub fn from_stream(
        stream: format::stream::Stream,
        target_sample_rate: u32,
        target_channels: u16,
    ) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().audio()?;
        let time_base = time_base_secs(&stream);

        // 只支持单声道和立体声输出，其余一律下混为立体声
        let target_channels = if target_channels == 1 { 1 } else { 2 };

        info!(
            "{} 音频解码器: {} Hz, {} 声道, {:?} → 目标: {} Hz, {} 声道, s16",
            log_ctx(),
            decoder.rate(),
            decoder.channels(),
            decoder.format(),
            target_sample_rate,
            target_channels
        );

        let resampler = Self::build_resampler(
            decoder.format(),
            decoder.channel_layout(),
            decoder.rate(),
            target_sample_rate,
            target_channels,
        )?;
        let input = (decoder.format(), decoder.rate(), decoder.channels() as u16);

        Ok(Self {
            decoder,
            resampler,
            input,
            time_base,
            target_channels,
            target_sample_rate,
        })
    }

    pub fn target_config(&self) -> (u32, u16) {
        (self.target_sample_rate, self.target_channels)
    }

    /// 源流的采样率和声道数
    pub fn source_config(&self) -> (u32, u16) {
        (self.input.1, self.input.2)
    }

    /// 输出设备实际打开的配置与当前目标不同时，按设备配置重建重采样器
    pub fn retarget(&mut self, target_sample_rate: u32, target_channels: u16) -> Result<()> {
        let target_channels = if target_channels == 1 { 1 } else { 2 };
        if (target_sample_rate, target_channels) == self.target_config() {
            return Ok(());
        }

        info!(
            "{} 音频目标配置调整: {} Hz, {} 声道 → {} Hz, {} 声道",
            log_ctx(),
            self.target_sample_rate,
            self.target_channels,
            target_sample_rate,
            target_channels
        );
        self.resampler = Self::build_resampler(
            self.input.0,
            self.decoder.channel_layout(),
            self.input.1,
            target_sample_rate,
            target_channels,
        )?;
        self.target_sample_rate = target_sample_rate;
        self.target_channels = target_channels;
        Ok(())
    }

    fn build_resampler(
        format: util::format::Sample,
        layout: ffmpeg::ChannelLayout,
        rate: u32,
        target_sample_rate: u32,
        target_channels: u16,
    ) -> Result<software::resampling::Context> {
        let target_layout = match target_channels {
            1 => ffmpeg::ChannelLayout::MONO,
            _ => ffmpeg::ChannelLayout::STEREO,
        };

        software::resampling::Context::get(
            format,
            layout,
            rate,
            util::format::Sample::I16(util::format::sample::Type::Packed),
            target_layout,
            target_sample_rate,
        )
        .map_err(|e| PlayerError::ConvertError(format!("创建音频重采样器失败: {}", e)))
    }

    /// 解码数据包
    pub fn decode(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<AudioFrame>> {
        let mut frames = Vec::new();

        loop {
            match self.decoder.send_packet(packet) {
                Ok(()) => break,
                Err(ffmpeg::Error::Other { errno: EAGAIN }) => {
                    let before = frames.len();
                    self.receive_frames(&mut frames)?;
                    if frames.len() == before {
                        return Err(PlayerError::DecodeError(
                            "音频解码器拒绝输入且没有可输出的帧".to_string(),
                        ));
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    debug!("音频解码器收到 EOF（send_packet），忽略本次包");
                    return Ok(frames);
                }
                Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
            }
        }

        self.receive_frames(&mut frames)?;
        Ok(frames)
    }

    /// 刷新解码器（获取缓冲的帧）
    pub fn flush(&mut self) -> Result<Vec<AudioFrame>> {
        let mut frames = Vec::new();
        if let Err(e) = self.decoder.send_eof() {
            debug!("音频解码器 send_eof 失败: {}", e);
            return Ok(frames);
        }
        self.receive_frames(&mut frames)?;
        self.decoder.flush();
        Ok(frames)
    }

    fn receive_frames(&mut self, frames: &mut Vec<AudioFrame>) -> Result<()> {
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let frame = self.convert_frame(&decoded)?;
                    if !frame.data.is_empty() {
                        frames.push(frame);
                    }
                }
                Err(ffmpeg::Error::Other { errno: EAGAIN }) => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("音频解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    fn convert_frame(&mut self, frame: &util::frame::Audio) -> Result<AudioFrame> {
        let input = (frame.format(), frame.rate(), frame.channels() as u16);
        if input != self.input {
            debug!(
                "🔧 音频输入格式变化 {:?} → {:?}，重建重采样器",
                self.input, input
            );
            self.resampler = Self::build_resampler(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                self.target_sample_rate,
                self.target_channels,
            )?;
            self.input = input;
        }

        let mut resampled = util::frame::Audio::empty();
        self.resampler
            .run(frame, &mut resampled)
            .map_err(|e| PlayerError::ConvertError(format!("音频重采样失败: {}", e)))?;

        let pts = frame.timestamp().map(|ts| ts as f64 * self.time_base);

        let size = resampled.samples()
            * self.target_channels as usize
            * SampleFormat::I16.bytes_per_sample();
        let plane = resampled.data(0);
        let data = plane[..size.min(plane.len())].to_vec();

        Ok(AudioFrame {
            pts,
            sample_rate: self.target_sample_rate,
            channels: self.target_channels,
            format: SampleFormat::I16,
            data,
        })
    }
}
