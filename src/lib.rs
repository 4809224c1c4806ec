//! 音视频同步播放引擎
//!
//! 解封装线程把数据包分发给音频、视频两个解码单元；音频通路驱动主时钟，
//! 视频通路按主时钟节拍交付 RGBA 画面。调用方通过 [`MediaPlayer`] 控制播放，
//! 通过 [`PlayerEvent`] 接收画面和进度。

pub mod core;
pub mod player;

pub use crate::core::{
    MediaInfo, MediaKind, PlaybackClock, PlaybackState, PlayerConfig, PlayerError, Result,
    VideoFrame,
};
pub use crate::player::{EventBus, MediaPlayer, PlayerEvent};
