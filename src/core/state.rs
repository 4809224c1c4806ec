use crate::core::PlaybackState;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// 跨线程共享的播放状态
///
/// 状态变化会唤醒所有等待者，暂停等待和可中断睡眠都是真正的阻塞等待，
/// `poll` 参数只是兜底的重新检查间隔。
pub struct StateCell {
    state: Mutex<PlaybackState>,
    changed: Condvar,
}

impl StateCell {
    pub fn new(state: PlaybackState) -> Self {
        Self {
            state: Mutex::new(state),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// 设置状态，返回旧状态
    pub fn set(&self, state: PlaybackState) -> PlaybackState {
        let mut guard = self.state.lock();
        let old = std::mem::replace(&mut *guard, state);
        drop(guard);
        self.changed.notify_all();
        old
    }

    /// 仅当当前状态为 `from` 时切换到 `to`
    pub fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        let mut guard = self.state.lock();
        if *guard != from {
            return false;
        }
        *guard = to;
        drop(guard);
        self.changed.notify_all();
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.get() == PlaybackState::NoPlay
    }

    /// 暂停期间阻塞，直到恢复或停止
    ///
    /// 返回 false 表示已停止，调用方应放弃本次交付。
    pub fn wait_while_paused(&self, poll: Duration) -> bool {
        let mut guard = self.state.lock();
        while *guard == PlaybackState::Paused {
            self.changed.wait_for(&mut guard, poll);
        }
        *guard != PlaybackState::NoPlay
    }

    /// 睡眠 `duration`，停止时提前醒来
    ///
    /// 返回 false 表示睡眠期间被停止。
    pub fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.state.lock();
        loop {
            if *guard == PlaybackState::NoPlay {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            self.changed.wait_for(&mut guard, deadline - now);
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(PlaybackState::NoPlay)
    }
}

impl std::fmt::Debug for StateCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StateCell").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn transition_requires_matching_state() {
        let cell = StateCell::new(PlaybackState::NoPlay);
        assert!(!cell.transition(PlaybackState::Playing, PlaybackState::Paused));
        assert!(cell.transition(PlaybackState::NoPlay, PlaybackState::Playing));
        assert_eq!(cell.get(), PlaybackState::Playing);
    }

    #[test]
    fn wait_while_paused_returns_on_resume() {
        let cell = Arc::new(StateCell::new(PlaybackState::Paused));
        let waiter = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                let start = Instant::now();
                let proceed = cell.wait_while_paused(Duration::from_secs(5));
                (proceed, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(100));
        cell.set(PlaybackState::Playing);

        let (proceed, waited) = waiter.join().unwrap();
        assert!(proceed);
        assert!(waited >= Duration::from_millis(90));
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn wait_while_paused_reports_stop() {
        let cell = Arc::new(StateCell::new(PlaybackState::Paused));
        let waiter = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.wait_while_paused(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(50));
        cell.set(PlaybackState::NoPlay);
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn sleep_is_interrupted_by_stop() {
        let cell = Arc::new(StateCell::new(PlaybackState::Playing));
        let sleeper = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                let start = Instant::now();
                (cell.sleep_unless_stopped(Duration::from_secs(5)), start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        cell.set(PlaybackState::NoPlay);

        let (completed, slept) = sleeper.join().unwrap();
        assert!(!completed);
        assert!(slept < Duration::from_secs(2));
    }

    #[test]
    fn sleep_runs_to_deadline_while_playing() {
        let cell = StateCell::new(PlaybackState::Playing);
        let start = Instant::now();
        assert!(cell.sleep_unless_stopped(Duration::from_millis(60)));
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
