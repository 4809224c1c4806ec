use crate::core::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放器配置
///
/// 所有字段都有默认值，JSON 中可以只写需要覆盖的部分。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub decode: DecodeConfig,
}

/// 音频通路配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_capacity: usize,     // 输出缓冲区容量（字节）
    pub backpressure_poll_ms: u64,  // 缓冲区满时的重试间隔
    pub drain_poll_ms: u64,         // 结束时等待缓冲区播完的检查间隔
    pub elapsed_tick_ms: u64,       // 播放进度通知间隔
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            buffer_capacity: 10 * 1024 * 1024,
            backpressure_poll_ms: 1000,
            drain_poll_ms: 100,
            elapsed_tick_ms: 500,
        }
    }
}

impl AudioConfig {
    pub fn backpressure_poll(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn elapsed_tick(&self) -> Duration {
        Duration::from_millis(self.elapsed_tick_ms.max(1))
    }
}

/// 视频通路配置（音画同步参数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub drop_threshold_secs: f64,   // 落后超过该值则丢帧
    pub ahead_delay_scale_ms: f64,  // 超前时每秒偏差对应的等待毫秒数
    pub max_ahead_wait_ms: u64,     // 超前时单帧最长等待
    pub clock_poll_ms: u64,         // 等待音频时钟就绪的检查间隔
    pub initial_delay_secs: f64,    // 初始画面延迟
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            drop_threshold_secs: 0.5,
            ahead_delay_scale_ms: 1500.0,
            max_ahead_wait_ms: 10_000,
            clock_poll_ms: 100,
            initial_delay_secs: 0.0,
        }
    }
}

impl VideoConfig {
    pub fn clock_poll(&self) -> Duration {
        Duration::from_millis(self.clock_poll_ms)
    }

    pub fn max_ahead_wait(&self) -> Duration {
        Duration::from_millis(self.max_ahead_wait_ms)
    }
}

/// 解码循环配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub idle_poll_ms: u64,   // 队列为空时的休眠间隔
    pub pause_poll_ms: u64,  // 暂停时的重新检查间隔
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: 10,
            pause_poll_ms: 100,
        }
    }
}

impl DecodeConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}

impl PlayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 检查同步参数的取值范围
    pub fn validate(&self) -> Result<()> {
        let video = &self.video;
        if !(video.drop_threshold_secs.is_finite() && video.drop_threshold_secs >= 0.0) {
            return Err(PlayerError::ConfigError(format!(
                "drop_threshold_secs 必须是非负数: {}",
                video.drop_threshold_secs
            )));
        }
        if !(video.ahead_delay_scale_ms.is_finite() && video.ahead_delay_scale_ms >= 0.0) {
            return Err(PlayerError::ConfigError(format!(
                "ahead_delay_scale_ms 必须是非负数: {}",
                video.ahead_delay_scale_ms
            )));
        }
        if !video.initial_delay_secs.is_finite() {
            return Err(PlayerError::ConfigError(format!(
                "initial_delay_secs 无效: {}",
                video.initial_delay_secs
            )));
        }
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
