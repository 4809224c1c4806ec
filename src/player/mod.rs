// 播放器核心模块

pub mod demuxer;
pub mod packet_queue;
pub mod unit;
pub mod decoder;
pub mod audio_output;
pub mod audio;
pub mod sync;
pub mod video;
pub mod events;
pub mod manager;

use std::{process, thread};

pub use demuxer::Demuxer;
pub use decoder::{AudioDecoder, VideoDecoder};
pub use audio_output::{AudioOutput, PcmBuffer};
pub use audio::AudioPath;
pub use video::VideoPath;
pub use sync::{AtomicSeconds, FrameAction, SyncPolicy, VideoPacer};
pub use unit::{DecodeStage, FinishReason, PlayTransition, PlaybackUnit, StageFlow, StreamUnit};
pub use events::{EventBus, PlayerEvent};
pub use manager::MediaPlayer;

/// 日志前缀：进程号 + 线程号
pub(crate) fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}
