use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 播放状态
///
/// 每个解码单元各自持有一份，会话（MediaPlayer）持有聚合后的一份。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    NoPlay,
    Playing,
    Paused,
}

/// 媒体类型（决定解码单元的角色）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    I16,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// 视频帧数据（已转换为固定像素格式，行间无填充）
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts: Option<f64>,   // 显示时间戳（秒），缺失时为 None
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// 音频帧数据（重采样后的交错 PCM 字节）
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: Option<f64>,   // 显示时间戳（秒）
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<u8>,
}

impl AudioFrame {
    /// 每声道采样数
    pub fn samples(&self) -> usize {
        let frame_bytes = self.channels as usize * self.format.bytes_per_sample();
        if frame_bytes == 0 {
            0
        } else {
            self.data.len() / frame_bytes
        }
    }

    /// 本帧的播放时长
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples() as f64 / self.sample_rate as f64)
    }
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: Option<Duration>,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,       // 源采样率
    pub channels: u16,          // 源声道数
    pub video_stream_index: usize,
    pub audio_stream_index: usize,
}
