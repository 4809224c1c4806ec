use crate::core::{MediaInfo, MediaKind, PlayerError, Result};
use crate::player::log_ctx;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use log::{debug, info};
use std::sync::OnceLock;
use std::time::Duration;

static FFMPEG_INIT: OnceLock<std::result::Result<(), ffmpeg::Error>> = OnceLock::new();

/// 初始化 FFmpeg（进程内只执行一次）
pub fn init_ffmpeg() -> Result<()> {
    FFMPEG_INIT
        .get_or_init(ffmpeg::init)
        .clone()
        .map_err(PlayerError::from)
}

/// 解封装器 - 负责读取媒体文件并按流索引产出数据包
pub struct Demuxer {
    input_ctx: format::context::Input,
    source_path: String,
}

impl Demuxer {
    /// 打开媒体文件并探测流信息
    pub fn open(path: &str) -> Result<Self> {
        init_ffmpeg()?;
        info!("{} 正在打开文件: {}", log_ctx(), path);

        let input_ctx = format::input(&path)
            .map_err(|e| PlayerError::OpenError(format!("{}: {}", path, e)))?;

        debug!(
            "容器格式: {}, 流数量: {}",
            input_ctx.format().name(),
            input_ctx.streams().count()
        );

        Ok(Self {
            input_ctx,
            source_path: path.to_string(),
        })
    }

    /// 选择指定类型的最佳流
    pub fn best_stream_index(&self, kind: MediaKind) -> Option<usize> {
        let medium = match kind {
            MediaKind::Audio => media::Type::Audio,
            MediaKind::Video => media::Type::Video,
        };
        self.input_ctx.streams().best(medium).map(|s| s.index())
    }

    pub fn stream(&self, index: usize) -> Option<format::stream::Stream<'_>> {
        self.input_ctx.stream(index)
    }

    /// 读取下一个数据包（每次分配一个新包）
    ///
    /// 文件结束返回 `Ok(None)`。
    pub fn read_packet(&mut self) -> Result<Option<ffmpeg::Packet>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => Ok(Some(packet)),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 容器标注的总时长，未知时为 None
    pub fn duration(&self) -> Option<Duration> {
        let micros = self.input_ctx.duration();
        if micros > 0 {
            Some(Duration::from_micros(micros as u64))
        } else {
            None
        }
    }

    pub fn codec_name(&self, index: usize) -> String {
        self.stream(index)
            .map(|s| s.parameters().id().name().to_string())
            .unwrap_or_else(|| "none".to_string())
    }

    pub fn frame_rate(&self, index: usize) -> f64 {
        self.stream(index)
            .map(|s| {
                let fps = s.avg_frame_rate();
                if fps.denominator() == 0 {
                    0.0
                } else {
                    fps.numerator() as f64 / fps.denominator() as f64
                }
            })
            .unwrap_or(0.0)
    }

    /// 汇总媒体信息
    ///
    /// 尺寸和采样参数来自已经打开的解码器，这里只补充容器层面的数据。
    pub fn media_info(&self, video_index: usize, audio_index: usize) -> MediaInfo {
        MediaInfo {
            duration: self.duration(),
            fps: self.frame_rate(video_index),
            video_codec: self.codec_name(video_index),
            audio_codec: self.codec_name(audio_index),
            video_stream_index: video_index,
            audio_stream_index: audio_index,
            ..MediaInfo::default()
        }
    }

    pub fn description(&self) -> &str {
        &self.source_path
    }
}
