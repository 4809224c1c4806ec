use crate::core::{PlaybackClock, StateCell};
use crate::player::log_ctx;
use log::{debug, trace};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 一帧画面的处理方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameAction {
    /// 落后太多，丢弃
    Drop,
    /// 超前，先等待再显示
    Wait(Duration),
    /// 直接显示
    Show,
}

/// 音画同步策略
///
/// drift = 主时钟 - 帧时间 - 画面延迟
/// - drift > drop_threshold：丢帧
/// - drift < 0：等待 -drift * ahead_delay_scale_ms 毫秒后显示，最多 max_wait
/// - 其他：立即显示
#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
    pub drop_threshold: f64,
    pub ahead_delay_scale_ms: f64,
    pub max_wait: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            drop_threshold: 0.5,
            ahead_delay_scale_ms: 1500.0,
            max_wait: Duration::from_secs(10),
        }
    }
}

impl SyncPolicy {
    pub fn drift(clock_secs: f64, frame_secs: f64, delay_secs: f64) -> f64 {
        clock_secs - frame_secs - delay_secs
    }

    pub fn decide(&self, drift: f64) -> FrameAction {
        if drift > self.drop_threshold {
            FrameAction::Drop
        } else if drift < 0.0 {
            let wait_secs = -drift * self.ahead_delay_scale_ms / 1000.0;
            let wait = match Duration::try_from_secs_f64(wait_secs) {
                Ok(wait) => wait.min(self.max_wait),
                Err(_) if wait_secs > 0.0 => self.max_wait,
                Err(_) => Duration::ZERO,
            };
            FrameAction::Wait(wait)
        } else {
            FrameAction::Show
        }
    }
}

/// 视频通路持有的主时钟引用，音频启动后才会绑定
#[derive(Clone, Default)]
pub struct ClockSlot(Arc<RwLock<Option<PlaybackClock>>>);

impl ClockSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, clock: PlaybackClock) {
        *self.0.write() = Some(clock);
    }

    pub fn get(&self) -> Option<PlaybackClock> {
        self.0.read().clone()
    }

    pub fn clear(&self) {
        *self.0.write() = None;
    }
}

/// 以位模式存放在 AtomicU64 中的 f64 秒数
#[derive(Debug, Default)]
pub struct AtomicSeconds(AtomicU64);

impl AtomicSeconds {
    pub fn new(secs: f64) -> Self {
        Self(AtomicU64::new(secs.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, secs: f64) {
        self.0.store(secs.to_bits(), Ordering::Relaxed);
    }
}

/// 视频帧节拍器：决定每一帧在什么时候交付
pub struct VideoPacer {
    clock: ClockSlot,
    delay: Arc<AtomicSeconds>,
    policy: SyncPolicy,
    clock_poll: Duration,
    dropped: AtomicUsize,
}

impl VideoPacer {
    pub fn new(
        clock: ClockSlot,
        delay: Arc<AtomicSeconds>,
        policy: SyncPolicy,
        clock_poll: Duration,
    ) -> Self {
        Self {
            clock,
            delay,
            policy,
            clock_poll,
            dropped: AtomicUsize::new(0),
        }
    }

    /// 阻塞到可以显示这一帧
    ///
    /// 返回 false 表示这一帧不应交付（被丢弃或播放已停止）。
    /// 没有时间戳的帧不参与同步，直接交付。
    pub fn pace(&self, frame_secs: Option<f64>, state: &StateCell) -> bool {
        let Some(frame_secs) = frame_secs else {
            return !state.is_stopped();
        };

        let clock = loop {
            if let Some(clock) = self.clock.get() {
                if clock.is_started() {
                    break clock;
                }
            }
            if !state.sleep_unless_stopped(self.clock_poll) {
                return false;
            }
        };

        let drift = SyncPolicy::drift(
            clock.elapsed().as_secs_f64(),
            frame_secs,
            self.delay.get(),
        );

        match self.policy.decide(drift) {
            FrameAction::Drop => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "{} 🗑️  丢弃视频帧 pts={:.3}s 落后 {:.3}s（累计 {}）",
                    log_ctx(),
                    frame_secs,
                    drift,
                    dropped
                );
                false
            }
            FrameAction::Wait(wait) => {
                trace!("视频帧超前 {:.3}s，等待 {:?}", -drift, wait);
                // 等待期间可能被暂停，恢复后才交付
                state.sleep_unless_stopped(wait) && state.wait_while_paused(self.clock_poll)
            }
            FrameAction::Show => !state.is_stopped(),
        }
    }

    pub fn dropped_frames(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}
