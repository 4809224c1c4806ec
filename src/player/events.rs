use crate::core::VideoFrame;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// 播放器对外通知
///
/// 事件由解码线程、计时线程和解封装线程发出，接收方负责切换到自己的 UI 线程。
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// 一帧画面可以显示
    FrameReady(Arc<VideoFrame>),
    /// 播放进度（定时发送）
    ElapsedTimeChanged(Duration),
    /// 声音第一次送入输出设备
    AudioStarted,
    /// 暂停后恢复播放
    AudioResumed,
    /// 音频通路播放完毕
    AudioCompleted,
    /// 打开媒体后给出总时长，停止时为 None
    DurationChanged(Option<Duration>),
    /// 整个会话播放完成（每次播放只发一次）
    PlaybackComplete,
}

/// 事件总线 - 每个订阅者都会收到全部事件
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<PlayerEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// 广播事件，顺带移除已断开的订阅者
    pub fn emit(&self, event: PlayerEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
