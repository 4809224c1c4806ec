use crate::core::{
    MediaInfo, MediaKind, PlaybackClock, PlaybackState, PlayerConfig, PlayerError, Result,
    StateCell,
};
use crate::player::audio::AudioPath;
use crate::player::demuxer::Demuxer;
use crate::player::events::{EventBus, PlayerEvent};
use crate::player::log_ctx;
use crate::player::sync::AtomicSeconds;
use crate::player::unit::PlaybackUnit;
use crate::player::video::VideoPath;
use crossbeam_channel::Receiver;
use ffmpeg_next as ffmpeg;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 流索引 → 解码单元
struct StreamRoutes {
    units: HashMap<usize, Arc<dyn PlaybackUnit>>,
}

impl StreamRoutes {
    fn new(units: Vec<Arc<dyn PlaybackUnit>>) -> Self {
        let units = units
            .into_iter()
            .filter_map(|unit| {
                let index = unit.stream_index()?;
                debug!("流 #{} → {} 解码单元", index, unit.kind());
                Some((index, unit))
            })
            .collect();
        Self { units }
    }

    /// 分发数据包，返回 false 表示该包被丢弃
    fn route(&self, packet: ffmpeg::Packet) -> bool {
        match self.units.get(&packet.stream()) {
            Some(unit) if unit.state() != PlaybackState::NoPlay => {
                unit.enqueue(packet);
                true
            }
            _ => false,
        }
    }
}

/// 会话完成判定：两个通路都结束后只触发一次
#[derive(Default)]
pub(crate) struct CompletionLatch {
    armed: AtomicBool,
    audio_done: AtomicBool,
    video_done: AtomicBool,
}

impl CompletionLatch {
    pub(crate) fn arm(&self) {
        self.audio_done.store(false, Ordering::SeqCst);
        self.video_done.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// 记录一个通路结束；两个通路都结束时返回 true（每次 arm 之后至多一次）
    pub(crate) fn mark(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio_done.store(true, Ordering::SeqCst),
            MediaKind::Video => self.video_done.store(true, Ordering::SeqCst),
        }
        if self.audio_done.load(Ordering::SeqCst) && self.video_done.load(Ordering::SeqCst) {
            self.armed.swap(false, Ordering::SeqCst)
        } else {
            false
        }
    }
}

/// 一次 open 对应的会话
struct Session {
    audio: Arc<dyn PlaybackUnit>,
    video: Arc<dyn PlaybackUnit>,
    clock: PlaybackClock,
    routes: StreamRoutes,
    demuxer: Mutex<Option<Demuxer>>,
    state: StateCell,
    latch: CompletionLatch,
    duration: Mutex<Option<Duration>>,
    media_info: MediaInfo,
    events: EventBus,
    retired: AtomicBool,
    pause_poll: Duration,
}

impl Session {
    fn new(
        audio: Arc<dyn PlaybackUnit>,
        video: Arc<dyn PlaybackUnit>,
        clock: PlaybackClock,
        demuxer: Option<Demuxer>,
        media_info: MediaInfo,
        events: EventBus,
        pause_poll: Duration,
    ) -> Self {
        let routes = StreamRoutes::new(vec![Arc::clone(&video), Arc::clone(&audio)]);
        Self {
            audio,
            video,
            clock,
            routes,
            demuxer: Mutex::new(demuxer),
            state: StateCell::new(PlaybackState::NoPlay),
            latch: CompletionLatch::default(),
            duration: Mutex::new(media_info.duration),
            media_info,
            events,
            retired: AtomicBool::new(false),
            pause_poll,
        }
    }

    fn play(self: &Arc<Self>) -> Result<()> {
        match self.state.get() {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => {
                self.resume();
                return Ok(());
            }
            PlaybackState::NoPlay => {}
        }

        let demuxer = self.demuxer.lock().take().ok_or(PlayerError::NotOpened)?;

        info!("{} 🎬 开始播放: {}", log_ctx(), demuxer.description());
        if let Err(e) = self.start_units() {
            // 解封装器还没用过，留给下一次 Play
            *self.demuxer.lock() = Some(demuxer);
            return Err(e);
        }

        let session = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("demux".to_string())
            .spawn(move || session.demux_loop(demuxer));

        if let Err(e) = spawned {
            error!("{} ❌ 无法启动解封装线程: {}", log_ctx(), e);
            self.abort_start();
            return Err(e.into());
        }
        Ok(())
    }

    /// 恢复仍在暂停中的通路；已经先结束的通路保持结束
    fn resume(&self) {
        if !self
            .state
            .transition(PlaybackState::Paused, PlaybackState::Playing)
        {
            return;
        }
        info!("{} ▶️  恢复播放", log_ctx());
        for unit in [&self.video, &self.audio] {
            if !unit.resume() {
                debug!("{} 通路已结束，无需恢复", unit.kind());
            }
        }
    }

    /// 启动两个解码单元；音频先启动，输出设备不可用时不会留下任何线程
    fn start_units(&self) -> Result<()> {
        self.latch.arm();
        self.state.set(PlaybackState::Playing);

        if let Err(e) = self.audio.play().and_then(|_| self.video.play()) {
            error!("{} ❌ 启动解码线程失败: {}", log_ctx(), e);
            self.abort_start();
            return Err(e);
        }
        Ok(())
    }

    fn abort_start(&self) {
        self.latch.disarm();
        self.state.set(PlaybackState::NoPlay);
        self.video.stop();
        self.audio.stop();
    }

    fn demux_loop(&self, mut demuxer: Demuxer) {
        info!("{} 📦 解封装线程启动", log_ctx());
        let mut packet_count: usize = 0;
        let mut discarded: usize = 0;

        loop {
            if !self.state.wait_while_paused(self.pause_poll) {
                info!("{} 解封装线程收到停止信号", log_ctx());
                break;
            }

            match demuxer.read_packet() {
                Ok(Some(packet)) => {
                    packet_count += 1;
                    if !self.routes.route(packet) {
                        discarded += 1;
                    }
                    if packet_count % 500 == 0 {
                        debug!("解封装数据包: {} (丢弃 {})", packet_count, discarded);
                    }
                }
                Ok(None) => {
                    info!("文件读取完毕，共 {} 个包（丢弃 {}）", packet_count, discarded);
                    break;
                }
                Err(e) => {
                    error!(
                        "{} 读取数据包失败: {} (已处理 {} 个包)",
                        log_ctx(),
                        e,
                        packet_count
                    );
                    break;
                }
            }
        }

        self.video.no_more_packets();
        self.audio.no_more_packets();
        drop(demuxer);
        info!("{} 📦 解封装线程结束", log_ctx());
    }

    fn pause(&self) {
        if self
            .state
            .transition(PlaybackState::Playing, PlaybackState::Paused)
        {
            info!("{} ⏸️  暂停", log_ctx());
            self.video.pause();
            self.audio.pause();
        }
    }

    fn stop(&self) {
        let old = self.state.set(PlaybackState::NoPlay);
        self.video.stop();
        self.audio.stop();
        if old != PlaybackState::NoPlay {
            info!("{} ⏹️  停止播放", log_ctx());
        }
        if self.duration.lock().take().is_some() {
            self.events.emit(PlayerEvent::DurationChanged(None));
        }
    }

    fn unit_completed(&self, kind: MediaKind) {
        debug!("{} 通路结束: {}", log_ctx(), kind);
        if !self.latch.mark(kind) {
            return;
        }
        self.state.set(PlaybackState::NoPlay);
        if self.retired.load(Ordering::SeqCst) {
            debug!("已退役会话完成，不再通知");
            return;
        }
        info!("{} 🏁 播放完成", log_ctx());
        self.events.emit(PlayerEvent::PlaybackComplete);
    }

    /// 退役：之后的完成事件不再对外发送
    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    fn dispose(&self) {
        self.retire();
        self.stop();
        self.video.dispose();
        self.audio.dispose();
        if self.demuxer.lock().take().is_some() {
            debug!("释放未使用的解封装器");
        }
    }
}

/// 媒体播放器 - 会话编排
///
/// 打开一个文件后，解封装线程把数据包分发给音频和视频两个通路，
/// 音频驱动主时钟，视频按主时钟节拍交付画面。所有通知通过 [`EventBus`] 发出。
pub struct MediaPlayer {
    config: PlayerConfig,
    events: EventBus,
    pic_delay: Arc<AtomicSeconds>,
    session: Option<Arc<Session>>,
}

impl MediaPlayer {
    pub fn new(config: PlayerConfig) -> Self {
        info!("{} 🎮 创建播放器", log_ctx());
        let pic_delay = Arc::new(AtomicSeconds::new(config.video.initial_delay_secs));
        Self {
            config,
            events: EventBus::new(),
            pic_delay,
            session: None,
        }
    }

    /// 打开媒体文件（会先释放上一个会话）
    pub fn open(&mut self, path: &str) -> Result<MediaInfo> {
        info!("{} 📂 打开媒体文件: {}", log_ctx(), path);
        self.release_session();

        let demuxer = Demuxer::open(path)?;

        let video = Arc::new(VideoPath::init(
            &demuxer,
            &self.config,
            self.events.clone(),
            Arc::clone(&self.pic_delay),
        )?);
        let audio = Arc::new(AudioPath::init(
            &demuxer,
            &self.config,
            self.events.clone(),
        )?);

        let (video_index, audio_index) = match (video.stream_index(), audio.stream_index()) {
            (Some(v), Some(a)) => (v, a),
            _ => return Err(PlayerError::Other("流索引未绑定".to_string())),
        };

        let (width, height) = video.dimensions();
        let (sample_rate, channels) = audio.source_config();
        let media_info = MediaInfo {
            width,
            height,
            sample_rate,
            channels,
            ..demuxer.media_info(video_index, audio_index)
        };
        let duration = media_info.duration;

        let session = Arc::new(Session::new(
            Arc::clone(&audio) as Arc<dyn PlaybackUnit>,
            Arc::clone(&video) as Arc<dyn PlaybackUnit>,
            audio.clock(),
            Some(demuxer),
            media_info.clone(),
            self.events.clone(),
            self.config.decode.pause_poll(),
        ));

        let clock_target = Arc::downgrade(&video);
        audio.set_on_clock_started(move |clock| {
            if let Some(video) = clock_target.upgrade() {
                video.bind_clock(clock);
            }
        });

        audio.set_on_complete(completion_hook(&session));
        video.set_on_complete(completion_hook(&session));

        info!(
            "{} ✅ 媒体已打开: {}x{} @ {:.2} fps, {} / {}, 时长 {:?}",
            log_ctx(),
            media_info.width,
            media_info.height,
            media_info.fps,
            media_info.video_codec,
            media_info.audio_codec,
            duration
        );

        self.session = Some(session);
        self.events.emit(PlayerEvent::DurationChanged(duration));
        Ok(media_info)
    }

    /// 开始播放，或从暂停中恢复
    pub fn play(&self) -> Result<()> {
        self.session
            .as_ref()
            .ok_or(PlayerError::NotOpened)?
            .play()
    }

    pub fn pause(&self) {
        if let Some(session) = &self.session {
            session.pause();
        }
    }

    /// 停止播放（可重复调用）
    pub fn stop(&self) {
        if let Some(session) = &self.session {
            session.stop();
        }
    }

    /// 释放当前会话的全部资源（可重复调用）
    pub fn dispose(&mut self) {
        self.release_session();
    }

    fn release_session(&mut self) {
        if let Some(session) = self.session.take() {
            info!("{} 🗑️  释放当前会话", log_ctx());
            session.dispose();
        }
    }

    pub fn current_state(&self) -> PlaybackState {
        self.session
            .as_ref()
            .map(|s| s.state.get())
            .unwrap_or_default()
    }

    /// 媒体总时长，停止后为 None
    pub fn duration(&self) -> Option<Duration> {
        self.session.as_ref().and_then(|s| *s.duration.lock())
    }

    /// 当前播放时间（音频主时钟）
    pub fn elapsed_time(&self) -> Duration {
        self.session
            .as_ref()
            .map(|s| s.clock.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// 画面延迟（秒），正值让画面相对声音延后
    pub fn pic_delay(&self) -> f64 {
        self.pic_delay.get()
    }

    /// 播放中也可以调整，下一帧生效
    pub fn set_pic_delay(&self, secs: f64) {
        if !secs.is_finite() {
            warn!("忽略无效的画面延迟: {}", secs);
            return;
        }
        debug!("画面延迟: {:.3}s", secs);
        self.pic_delay.set(secs);
    }

    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.session.as_ref().map(|s| s.media_info.clone())
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }
}

/// 通路完成 → 会话完成判定；只持有弱引用，会话释放后通知自然失效
fn completion_hook(session: &Arc<Session>) -> impl Fn(MediaKind) + Send + Sync + 'static {
    let weak = Arc::downgrade(session);
    move |kind| {
        if let Some(session) = weak.upgrade() {
            session.unit_completed(kind);
        }
    }
}

impl Default for MediaPlayer {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        self.release_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::unit::{DecodeStage, FinishReason, StageFlow, StreamUnit};
    use crossbeam_channel::unbounded;
    use std::time::Instant;

    /// 不做解码的单元，只保留状态机和解码线程
    struct IdleStage;

    impl DecodeStage for IdleStage {
        type Packet = ffmpeg::Packet;

        fn process(&mut self, _packet: ffmpeg::Packet, state: &StateCell) -> StageFlow {
            state.wait_while_paused(Duration::from_millis(10));
            StageFlow::Continue
        }

        fn finish(&mut self, _state: &StateCell, _reason: FinishReason) {}
    }

    struct IdleUnit(Arc<StreamUnit<IdleStage>>);

    impl PlaybackUnit for IdleUnit {
        fn kind(&self) -> MediaKind {
            self.0.kind()
        }

        fn stream_index(&self) -> Option<usize> {
            self.0.stream_index()
        }

        fn enqueue(&self, packet: ffmpeg::Packet) {
            self.0.enqueue(packet);
        }

        fn play(&self) -> Result<()> {
            self.0.play().map(|_| ())
        }

        fn resume(&self) -> bool {
            self.0.resume()
        }

        fn pause(&self) {
            self.0.pause();
        }

        fn stop(&self) {
            self.0.stop();
        }

        fn no_more_packets(&self) {
            self.0.no_more_packets();
        }

        fn state(&self) -> PlaybackState {
            self.0.state()
        }

        fn dispose(&self) {
            self.0.dispose();
        }
    }

    struct Fixture {
        session: Arc<Session>,
        audio: Arc<StreamUnit<IdleStage>>,
        video: Arc<StreamUnit<IdleStage>>,
        events: Receiver<PlayerEvent>,
    }

    fn fixture() -> Fixture {
        let audio = Arc::new(StreamUnit::new(
            MediaKind::Audio,
            1,
            IdleStage,
            Duration::from_millis(2),
        ));
        let video = Arc::new(StreamUnit::new(
            MediaKind::Video,
            0,
            IdleStage,
            Duration::from_millis(2),
        ));
        let bus = EventBus::new();
        let events = bus.subscribe();
        let media_info = MediaInfo {
            duration: Some(Duration::from_secs(2)),
            ..MediaInfo::default()
        };

        let session = Arc::new(Session::new(
            Arc::new(IdleUnit(Arc::clone(&audio))),
            Arc::new(IdleUnit(Arc::clone(&video))),
            PlaybackClock::new(),
            None,
            media_info,
            bus,
            Duration::from_millis(10),
        ));
        audio.set_on_complete(completion_hook(&session));
        video.set_on_complete(completion_hook(&session));

        Fixture {
            session,
            audio,
            video,
            events,
        }
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

    fn completions(events: &Receiver<PlayerEvent>, window: Duration) -> usize {
        let deadline = Instant::now() + window;
        let mut count = 0;
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match events.recv_timeout(left) {
                Ok(PlayerEvent::PlaybackComplete) => count += 1,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        count
    }

    #[test]
    fn resume_after_one_path_finished_keeps_the_other_going() {
        let f = fixture();
        f.session.start_units().unwrap();
        assert_eq!(f.session.state.get(), PlaybackState::Playing);

        // 视频先结束
        f.video.no_more_packets();
        assert!(wait_until(Duration::from_secs(2), || {
            f.video.state() == PlaybackState::NoPlay
        }));

        f.session.pause();
        assert_eq!(f.session.state.get(), PlaybackState::Paused);
        assert_eq!(f.audio.state(), PlaybackState::Paused);

        f.session.play().unwrap();
        assert_eq!(f.session.state.get(), PlaybackState::Playing);
        assert_eq!(f.audio.state(), PlaybackState::Playing);
        assert_eq!(f.video.state(), PlaybackState::NoPlay);
        assert!(f.events.try_recv().is_err());

        f.audio.no_more_packets();
        assert_eq!(completions(&f.events, Duration::from_millis(800)), 1);
        assert_eq!(f.session.state.get(), PlaybackState::NoPlay);
    }

    #[test]
    fn session_stop_clears_duration_and_completes_once() {
        let f = fixture();
        f.session.start_units().unwrap();

        f.session.stop();
        f.session.stop();
        assert_eq!(f.session.state.get(), PlaybackState::NoPlay);
        assert_eq!(*f.session.duration.lock(), None);

        assert!(matches!(
            f.events.recv_timeout(Duration::from_secs(1)),
            Ok(PlayerEvent::DurationChanged(None))
        ));
        assert_eq!(completions(&f.events, Duration::from_millis(500)), 1);
    }

    #[test]
    fn retired_session_does_not_report_completion() {
        let f = fixture();
        f.session.start_units().unwrap();
        f.session.dispose();

        assert!(wait_until(Duration::from_secs(2), || {
            f.audio.state() == PlaybackState::NoPlay && f.video.state() == PlaybackState::NoPlay
        }));
        assert_eq!(completions(&f.events, Duration::from_millis(300)), 0);
    }

    #[test]
    fn session_without_demuxer_cannot_start() {
        let f = fixture();
        assert!(matches!(f.session.play(), Err(PlayerError::NotOpened)));
        assert_eq!(f.session.state.get(), PlaybackState::NoPlay);
    }

    #[test]
    fn latch_fires_once_after_both_paths() {
        let latch = CompletionLatch::default();
        latch.arm();
        assert!(!latch.mark(MediaKind::Audio));
        assert!(latch.mark(MediaKind::Video));
        assert!(!latch.mark(MediaKind::Video));
        assert!(!latch.mark(MediaKind::Audio));
    }

    #[test]
    fn latch_ignores_marks_before_arm() {
        let latch = CompletionLatch::default();
        assert!(!latch.mark(MediaKind::Audio));
        assert!(!latch.mark(MediaKind::Video));

        latch.arm();
        assert!(!latch.mark(MediaKind::Video));
        latch.disarm();
        assert!(!latch.mark(MediaKind::Audio));
    }

    #[test]
    fn latch_handles_paths_finishing_on_different_threads() {
        let latch = Arc::new(CompletionLatch::default());
        latch.arm();
        let (tx, rx) = unbounded();

        let workers: Vec<_> = [(MediaKind::Audio, 50u64), (MediaKind::Video, 100u64)]
            .into_iter()
            .map(|(kind, delay_ms)| {
                let latch = Arc::clone(&latch);
                let tx = tx.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(delay_ms));
                    if latch.mark(kind) {
                        tx.send(kind).unwrap();
                    }
                })
            })
            .collect();
        drop(tx);
        for worker in workers {
            worker.join().unwrap();
        }

        let fired: Vec<_> = rx.iter().collect();
        assert_eq!(fired, vec![MediaKind::Video]);
    }

    #[test]
    fn new_player_is_idle() {
        let player = MediaPlayer::default();
        assert_eq!(player.current_state(), PlaybackState::NoPlay);
        assert_eq!(player.duration(), None);
        assert_eq!(player.elapsed_time(), Duration::ZERO);
        assert!(player.media_info().is_none());
    }

    #[test]
    fn play_without_open_is_rejected() {
        let player = MediaPlayer::default();
        assert!(matches!(player.play(), Err(PlayerError::NotOpened)));
    }

    #[test]
    fn stop_and_dispose_are_idempotent_without_media() {
        let mut player = MediaPlayer::default();
        player.stop();
        player.stop();
        player.pause();
        player.dispose();
        player.dispose();
        assert_eq!(player.current_state(), PlaybackState::NoPlay);
    }

    #[test]
    fn open_missing_file_fails() {
        let mut player = MediaPlayer::default();
        let result = player.open("/definitely/not/here.mp4");
        assert!(matches!(result, Err(PlayerError::OpenError(_))));
        assert!(player.media_info().is_none());
    }

    #[test]
    fn pic_delay_starts_from_config_and_rejects_nan() {
        let mut config = PlayerConfig::default();
        config.video.initial_delay_secs = 0.2;
        let player = MediaPlayer::new(config);
        assert_eq!(player.pic_delay(), 0.2);

        player.set_pic_delay(-0.1);
        assert_eq!(player.pic_delay(), -0.1);
        player.set_pic_delay(f64::NAN);
        assert_eq!(player.pic_delay(), -0.1);
    }
}
