//! 解码单元的公共契约
//!
//! 音频通路和视频通路共用同一套状态机和解码循环：
//! 入队 → 解码线程取包 → 角色相关的处理（[`DecodeStage`]）→ 结束时释放资源并通知一次。

use crate::core::{MediaKind, PlaybackState, PlayerError, Result, StateCell};
use crate::player::log_ctx;
use crate::player::packet_queue::PacketQueue;
use ffmpeg_next as ffmpeg;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 单个包处理后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFlow {
    /// 继续处理下一个包
    Continue,
    /// 本单元无法继续（例如格式转换失败），结束解码循环
    Abort,
}

/// 解码循环结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// 输入已全部处理完
    EndOfInput,
    /// 被 Stop 打断
    Stopped,
    /// 处理过程中出现不可恢复的错误
    Aborted,
}

/// 角色相关的包处理逻辑
///
/// 实例在 Play 时被移入解码线程独占，循环结束后随线程一起释放，
/// 因此解码器和转换器的生命周期与一次播放严格对应。
pub trait DecodeStage: Send + 'static {
    type Packet: Send + 'static;

    /// 解码一个包并交付得到的所有帧
    fn process(&mut self, packet: Self::Packet, state: &StateCell) -> StageFlow;

    /// 循环结束前调用一次
    fn finish(&mut self, state: &StateCell, reason: FinishReason);
}

/// Play 调用的效果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayTransition {
    Started,
    Resumed,
    AlreadyPlaying,
}

type CompletionHook = Arc<dyn Fn(MediaKind) + Send + Sync>;

/// 解码单元：状态机 + 输入队列 + 解码线程
pub struct StreamUnit<S: DecodeStage> {
    kind: MediaKind,
    state: StateCell,
    queue: PacketQueue<S::Packet>,
    no_more_packets: AtomicBool,
    stage: Mutex<Option<S>>,
    stream_index: Mutex<Option<usize>>,
    completed: AtomicBool,
    on_complete: Mutex<Option<CompletionHook>>,
    idle_poll: Duration,
}

impl<S: DecodeStage> StreamUnit<S> {
    pub fn new(kind: MediaKind, stream_index: usize, stage: S, idle_poll: Duration) -> Self {
        Self {
            kind,
            state: StateCell::new(PlaybackState::NoPlay),
            queue: PacketQueue::new(),
            no_more_packets: AtomicBool::new(false),
            stage: Mutex::new(Some(stage)),
            stream_index: Mutex::new(Some(stream_index)),
            completed: AtomicBool::new(false),
            on_complete: Mutex::new(None),
            idle_poll,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn stream_index(&self) -> Option<usize> {
        *self.stream_index.lock()
    }

    pub fn state(&self) -> PlaybackState {
        self.state.get()
    }

    /// 队列中尚未处理的包数量
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// 注册完成通知（在解码线程上调用，每个播放周期一次）
    pub fn set_on_complete<F>(&self, hook: F)
    where
        F: Fn(MediaKind) + Send + Sync + 'static,
    {
        *self.on_complete.lock() = Some(Arc::new(hook));
    }

    pub fn enqueue(&self, packet: S::Packet) {
        self.queue.push(packet);
    }

    /// 暂停中则原地恢复；未播放则启动新的解码线程
    pub fn play(self: &Arc<Self>) -> Result<PlayTransition> {
        if self.resume() {
            return Ok(PlayTransition::Resumed);
        }
        if self.state.get() == PlaybackState::Playing {
            return Ok(PlayTransition::AlreadyPlaying);
        }

        let stage = self
            .stage
            .lock()
            .take()
            .ok_or(PlayerError::NotReady(self.kind))?;

        self.no_more_packets.store(false, Ordering::SeqCst);
        self.completed.store(false, Ordering::SeqCst);
        self.state.set(PlaybackState::Playing);

        let unit = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-decode", self.kind))
            .spawn(move || unit.decode_loop(stage));

        if let Err(e) = spawned {
            self.state.set(PlaybackState::NoPlay);
            return Err(e.into());
        }
        Ok(PlayTransition::Started)
    }

    /// 只从暂停恢复，不会启动新的播放周期；已结束的单元返回 false
    pub fn resume(&self) -> bool {
        if self
            .state
            .transition(PlaybackState::Paused, PlaybackState::Playing)
        {
            debug!("{} ▶ {} 单元恢复播放", log_ctx(), self.kind);
            true
        } else {
            false
        }
    }

    /// 仅在播放中生效
    pub fn pause(&self) -> bool {
        self.state
            .transition(PlaybackState::Playing, PlaybackState::Paused)
    }

    /// 立即切换到 NoPlay，解码线程自行检测并退出，不在此处 join
    pub fn stop(&self) -> bool {
        self.state.set(PlaybackState::NoPlay) != PlaybackState::NoPlay
    }

    pub fn no_more_packets(&self) {
        self.no_more_packets.store(true, Ordering::SeqCst);
    }

    /// 释放尚未启动的解码器，可重复调用
    pub fn dispose(&self) {
        if self.stage.lock().take().is_some() {
            debug!("{} 🗑️  释放 {} 解码器", log_ctx(), self.kind);
        }
        self.queue.clear();
        *self.stream_index.lock() = None;
    }

    fn decode_loop(self: Arc<Self>, mut stage: S) {
        info!("{} 🎬 {} 解码线程启动", log_ctx(), self.kind);
        let mut processed: usize = 0;

        let reason = loop {
            // 暂停期间不取包，也不会因为输入结束而提前收尾
            if !self.state.wait_while_paused(self.idle_poll) {
                break FinishReason::Stopped;
            }

            match self.queue.pop() {
                Some(packet) => {
                    processed += 1;
                    if stage.process(packet, &self.state) == StageFlow::Abort {
                        warn!("{} ⚠ {} 解码循环中止", log_ctx(), self.kind);
                        break FinishReason::Aborted;
                    }
                }
                None => {
                    // 入队发生在 no_more_packets 之前，这里再确认一次队列为空
                    if self.no_more_packets.load(Ordering::SeqCst) && self.queue.is_empty() {
                        break FinishReason::EndOfInput;
                    }
                    thread::sleep(self.idle_poll);
                }
            }
        };

        let reason = if self.state.is_stopped() {
            FinishReason::Stopped
        } else {
            reason
        };
        stage.finish(&self.state, reason);
        self.finalize(stage, reason, processed);
    }

    fn finalize(&self, stage: S, reason: FinishReason, processed: usize) {
        drop(stage);
        let dropped = self.queue.clear();
        *self.stream_index.lock() = None;
        self.state.set(PlaybackState::NoPlay);

        info!(
            "{} 🛑 {} 解码线程结束（{:?}，处理 {} 个包，丢弃 {} 个）",
            log_ctx(),
            self.kind,
            reason,
            processed,
            dropped
        );

        if !self.completed.swap(true, Ordering::SeqCst) {
            let hook = self.on_complete.lock().clone();
            if let Some(hook) = hook {
                hook(self.kind);
            }
        }
    }
}

/// 解码单元对外的能力集合 {bind, enqueue, run, pause, stop}
///
/// 流索引 → 单元 的绑定表以 trait object 持有单元，解封装线程只通过它分发数据包。
pub trait PlaybackUnit: Send + Sync {
    fn kind(&self) -> MediaKind;
    fn stream_index(&self) -> Option<usize>;
    fn enqueue(&self, packet: ffmpeg::Packet);
    /// 启动新的播放周期，或从暂停恢复
    fn play(&self) -> Result<()>;
    /// 仅从暂停恢复；单元已结束时什么也不做并返回 false
    fn resume(&self) -> bool;
    fn pause(&self);
    fn stop(&self);
    fn no_more_packets(&self);
    fn state(&self) -> PlaybackState;
    fn dispose(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use std::time::Instant;

    const ABORT: u32 = u32::MAX;

    #[derive(Clone, Default)]
    struct Probe {
        seen: Arc<Mutex<Vec<u32>>>,
        finishes: Arc<Mutex<Vec<FinishReason>>>,
    }

    struct RecordingStage {
        probe: Probe,
    }

    impl DecodeStage for RecordingStage {
        type Packet = u32;

        fn process(&mut self, packet: u32, state: &StateCell) -> StageFlow {
            if packet == ABORT {
                return StageFlow::Abort;
            }
            if !state.wait_while_paused(Duration::from_millis(20)) {
                return StageFlow::Continue;
            }
            self.probe.seen.lock().push(packet);
            StageFlow::Continue
        }

        fn finish(&mut self, _state: &StateCell, reason: FinishReason) {
            self.probe.finishes.lock().push(reason);
        }
    }

    fn recording_unit() -> (Arc<StreamUnit<RecordingStage>>, Probe, Receiver<MediaKind>) {
        let probe = Probe::default();
        let unit = Arc::new(StreamUnit::new(
            MediaKind::Video,
            3,
            RecordingStage {
                probe: probe.clone(),
            },
            Duration::from_millis(2),
        ));
        let (tx, rx) = unbounded();
        unit.set_on_complete(move |kind| {
            let _ = tx.send(kind);
        });
        (unit, probe, rx)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn processes_packets_in_arrival_order() {
        let (unit, probe, completions) = recording_unit();
        assert_eq!(unit.play().unwrap(), PlayTransition::Started);

        let producer = {
            let unit = Arc::clone(&unit);
            thread::spawn(move || {
                for pts in 0..1000u32 {
                    unit.enqueue(pts);
                    if pts % 97 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
                unit.no_more_packets();
            })
        };
        producer.join().unwrap();

        assert_eq!(
            completions.recv_timeout(Duration::from_secs(5)).unwrap(),
            MediaKind::Video
        );
        assert_eq!(*probe.seen.lock(), (0..1000).collect::<Vec<_>>());
        assert_eq!(*probe.finishes.lock(), vec![FinishReason::EndOfInput]);
        assert_eq!(unit.state(), PlaybackState::NoPlay);
        assert_eq!(unit.stream_index(), None);
        assert!(completions.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn stop_is_immediate_and_idempotent() {
        let (unit, probe, completions) = recording_unit();
        unit.play().unwrap();

        assert!(unit.stop());
        assert_eq!(unit.state(), PlaybackState::NoPlay);
        assert!(!unit.stop());

        completions.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(completions.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(*probe.finishes.lock(), vec![FinishReason::Stopped]);
    }

    #[test]
    fn pause_suspends_delivery_until_resumed() {
        let (unit, probe, completions) = recording_unit();
        unit.play().unwrap();
        assert!(unit.pause());
        assert_eq!(unit.state(), PlaybackState::Paused);

        for pts in 1..=3 {
            unit.enqueue(pts);
        }
        thread::sleep(Duration::from_millis(150));
        assert!(probe.seen.lock().is_empty());

        assert_eq!(unit.play().unwrap(), PlayTransition::Resumed);
        assert!(wait_until(Duration::from_secs(2), || probe.seen.lock().len() == 3));

        unit.no_more_packets();
        completions.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(*probe.seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn paused_unit_does_not_finish_on_end_of_input() {
        let (unit, probe, completions) = recording_unit();
        unit.play().unwrap();
        unit.pause();
        unit.no_more_packets();
        assert!(completions.recv_timeout(Duration::from_millis(150)).is_err());
        assert_eq!(unit.state(), PlaybackState::Paused);

        assert!(unit.resume());
        completions.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(*probe.finishes.lock(), vec![FinishReason::EndOfInput]);
    }

    #[test]
    fn stop_while_paused_releases_waiting_thread() {
        let (unit, probe, completions) = recording_unit();
        unit.play().unwrap();
        unit.pause();
        unit.enqueue(7);
        thread::sleep(Duration::from_millis(50));

        unit.stop();
        completions.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(probe.seen.lock().is_empty());
    }

    #[test]
    fn pause_only_applies_while_playing() {
        let (unit, _probe, _completions) = recording_unit();
        assert!(!unit.pause());
        assert_eq!(unit.state(), PlaybackState::NoPlay);
    }

    #[test]
    fn abort_finishes_the_unit() {
        let (unit, probe, completions) = recording_unit();
        unit.play().unwrap();
        unit.enqueue(1);
        unit.enqueue(ABORT);
        unit.enqueue(2);

        completions.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(*probe.seen.lock(), vec![1]);
        assert_eq!(*probe.finishes.lock(), vec![FinishReason::Aborted]);
        assert_eq!(unit.queued(), 0);
    }

    #[test]
    fn replay_after_completion_is_not_ready() {
        let (unit, _probe, completions) = recording_unit();
        unit.play().unwrap();
        unit.no_more_packets();
        completions.recv_timeout(Duration::from_secs(2)).unwrap();

        assert!(matches!(
            unit.play(),
            Err(PlayerError::NotReady(MediaKind::Video))
        ));
    }

    #[test]
    fn resume_skips_finished_unit() {
        let (unit, _probe, completions) = recording_unit();
        unit.play().unwrap();
        unit.no_more_packets();
        completions.recv_timeout(Duration::from_secs(2)).unwrap();

        assert!(!unit.resume());
        assert_eq!(unit.state(), PlaybackState::NoPlay);
        assert!(completions.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn resume_only_leaves_pause() {
        let (unit, probe, completions) = recording_unit();
        assert!(!unit.resume());
        assert_eq!(unit.state(), PlaybackState::NoPlay);

        unit.play().unwrap();
        assert!(!unit.resume());
        unit.pause();
        unit.enqueue(5);
        assert!(unit.resume());
        assert_eq!(unit.state(), PlaybackState::Playing);

        unit.no_more_packets();
        completions.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(*probe.seen.lock(), vec![5]);
    }

    #[test]
    fn dispose_is_idempotent() {
        let (unit, _probe, _completions) = recording_unit();
        unit.enqueue(1);
        unit.dispose();
        unit.dispose();
        assert_eq!(unit.queued(), 0);
        assert_eq!(unit.stream_index(), None);
        assert!(unit.play().is_err());
    }
}
