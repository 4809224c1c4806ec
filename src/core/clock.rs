use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 播放时钟 - 音视频同步的主时钟
///
/// 由音频通路在声音第一次送入输出设备时启动，暂停时停止累计，
/// 恢复后继续累计（不清零）。视频通路只读取，不修改。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base: Duration,         // 上次暂停（或 set_time）时累计的时间
    base_instant: Instant,  // 本段计时的起点
    started: bool,
    running: bool,
}

impl ClockInner {
    fn now(&self) -> Duration {
        if self.running {
            self.base + self.base_instant.elapsed()
        } else {
            self.base
        }
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base: Duration::ZERO,
                base_instant: Instant::now(),
                started: false,
                running: false,
            })),
        }
    }

    /// 当前播放时间
    pub fn elapsed(&self) -> Duration {
        self.inner.lock().now()
    }

    /// 启动时钟（仅第一次调用生效）
    ///
    /// 返回 true 表示本次调用真正启动了时钟。
    pub fn start(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.started {
            return false;
        }
        inner.started = true;
        inner.running = true;
        inner.base_instant = Instant::now();
        true
    }

    /// 暂停计时
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if inner.running {
            inner.base = inner.now();
            inner.running = false;
        }
    }

    /// 恢复计时，累计时间不清零
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.started && !inner.running {
            inner.base_instant = Instant::now();
            inner.running = true;
        }
    }

    /// 设置播放位置
    pub fn set_time(&self, position: Duration) {
        let mut inner = self.inner.lock();
        inner.base = position;
        inner.base_instant = Instant::now();
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PlaybackClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PlaybackClock")
            .field("elapsed", &inner.now())
            .field("started", &inner.started)
            .field("running", &inner.running)
            .finish()
    }
}
