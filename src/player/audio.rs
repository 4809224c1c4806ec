//! 音频通路
//!
//! 解码 → 重采样为 s16 → 写入有界 PCM 缓冲区（满了就等）→ cpal 播放。
//! 声音第一次送入输出设备时启动主时钟，并把时钟交给视频通路。

use crate::core::{
    AudioConfig, AudioFrame, MediaKind, PlaybackClock, PlaybackState, PlayerConfig, PlayerError,
    Result, StateCell,
};
use crate::player::audio_output::{AudioOutput, PcmBuffer};
use crate::player::decoder::AudioDecoder;
use crate::player::demuxer::Demuxer;
use crate::player::events::{EventBus, PlayerEvent};
use crate::player::log_ctx;
use crate::player::unit::{
    DecodeStage, FinishReason, PlayTransition, PlaybackUnit, StageFlow, StreamUnit,
};
use ffmpeg_next as ffmpeg;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type ClockListener = Arc<dyn Fn(PlaybackClock) + Send + Sync>;

/// 解码线程和控制线程共享的部分
///
/// 输出设备在第一次 Play 时才打开；`output` 的锁同时串行化
/// 首次启动与 Pause/Resume 对时钟和设备的操作。
struct AudioShared {
    output: Mutex<Option<AudioOutput>>,
    target: Mutex<(u32, u16)>,
    buffer: Arc<PcmBuffer>,
    clock: PlaybackClock,
    clock_listener: Mutex<Option<ClockListener>>,
    events: EventBus,
    config: AudioConfig,
    pause_poll: Duration,
}

impl AudioShared {
    /// 启动主时钟并通知（只有第一次生效）
    fn publish_clock(&self) {
        if !self.clock.start() {
            return;
        }
        info!("{} ⏱️  音频时钟启动", log_ctx());
        let listener = self.clock_listener.lock().clone();
        if let Some(listener) = listener {
            listener(self.clock.clone());
        }
        self.events.emit(PlayerEvent::AudioStarted);
    }

    /// 打开输出设备（已打开则跳过），记录设备实际使用的配置
    fn open_output(&self) -> Result<()> {
        let mut output = self.output.lock();
        if output.is_some() {
            return Ok(());
        }
        let opened = AudioOutput::new(
            self.config.sample_rate,
            self.config.channels.clamp(1, 2),
            Arc::clone(&self.buffer),
        )?;
        *self.target.lock() = opened.get_config();
        *output = Some(opened);
        Ok(())
    }

    /// 第一次交付：启动设备和主时钟
    ///
    /// 在输出锁内完成，期间到来的 Pause 会在启动后立即生效。
    fn start_playback(&self, state: &StateCell) {
        let mut output = self.output.lock();
        match output.as_mut() {
            Some(output) => {
                if let Err(e) = output.start() {
                    error!("{} ❌ 音频输出启动失败: {}", log_ctx(), e);
                }
            }
            None => warn!("{} 音频输出设备未打开", log_ctx()),
        }
        self.publish_clock();

        if state.get() == PlaybackState::Paused {
            debug!("音频启动时已处于暂停状态");
            self.clock.pause();
            if let Some(output) = output.as_ref() {
                output.pause();
            }
        }
    }

    fn stop_output(&self) {
        if let Some(output) = self.output.lock().as_mut() {
            output.stop();
        }
        self.buffer.clear();
    }

    fn output_started(&self) -> bool {
        self.output
            .lock()
            .as_ref()
            .map_or(false, |output| output.is_started())
    }
}

struct AudioStage {
    decoder: AudioDecoder,
    shared: Arc<AudioShared>,
    delivered: bool,
    retargeted: bool,
}

impl AudioStage {
    /// 写入输出缓冲区，返回 false 表示播放已停止
    fn deliver(&mut self, frame: AudioFrame, state: &StateCell) -> bool {
        let shared = &self.shared;

        while !shared.buffer.fits(frame.data.len()) {
            debug!(
                "音频缓冲区已满 ({} / {} 字节)，等待消费",
                shared.buffer.len(),
                shared.buffer.capacity()
            );
            if !state.sleep_unless_stopped(shared.config.backpressure_poll()) {
                return false;
            }
        }

        if !state.wait_while_paused(shared.pause_poll) {
            return false;
        }

        shared.buffer.push(&frame.data);

        if !self.delivered {
            self.delivered = true;
            shared.start_playback(state);
        }
        true
    }

    fn deliver_all(&mut self, frames: Vec<AudioFrame>, state: &StateCell) {
        for frame in frames {
            if !self.deliver(frame, state) {
                break;
            }
        }
    }
}

impl DecodeStage for AudioStage {
    type Packet = ffmpeg::Packet;

    fn process(&mut self, packet: ffmpeg::Packet, state: &StateCell) -> StageFlow {
        if !self.retargeted {
            self.retargeted = true;
            let (rate, channels) = *self.shared.target.lock();
            if let Err(e) = self.decoder.retarget(rate, channels) {
                error!("{} ❌ 音频重采样器重建失败: {}", log_ctx(), e);
                return StageFlow::Abort;
            }
        }

        match self.decoder.decode(&packet) {
            Ok(frames) => {
                self.deliver_all(frames, state);
                StageFlow::Continue
            }
            Err(PlayerError::ConvertError(e)) => {
                error!("{} ❌ 音频转换失败: {}", log_ctx(), e);
                StageFlow::Abort
            }
            Err(e) => {
                warn!("丢弃音频包 (pts={:?}): {}", packet.pts(), e);
                StageFlow::Continue
            }
        }
    }

    fn finish(&mut self, state: &StateCell, reason: FinishReason) {
        let shared = Arc::clone(&self.shared);

        if reason == FinishReason::EndOfInput {
            match self.decoder.flush() {
                Ok(frames) => self.deliver_all(frames, state),
                Err(e) => warn!("音频解码器 flush 失败: {}", e),
            }

            if shared.output_started() {
                while !shared.buffer.is_empty()
                    && state.sleep_unless_stopped(shared.config.drain_poll())
                {}
            }
        }

        shared.stop_output();

        if reason != FinishReason::Stopped && !shared.clock.is_started() {
            // 一帧都没播出去，仍然放行视频
            warn!("{} 音频没有产生任何输出，直接启动时钟", log_ctx());
            shared.publish_clock();
        }

        shared.events.emit(PlayerEvent::AudioCompleted);
    }
}

/// 音频通路：拥有主时钟
pub struct AudioPath {
    unit: Arc<StreamUnit<AudioStage>>,
    shared: Arc<AudioShared>,
    source: (u32, u16),
}

impl AudioPath {
    /// 选择音频流，按配置的目标格式创建解码器和重采样器
    ///
    /// 不打开输出设备；设备在 Play 时打开，实际配置不同时解码线程会重建重采样器。
    pub fn init(demuxer: &Demuxer, config: &PlayerConfig, events: EventBus) -> Result<Self> {
        let index = demuxer
            .best_stream_index(MediaKind::Audio)
            .ok_or(PlayerError::NoAudioStream)?;
        let stream = demuxer.stream(index).ok_or(PlayerError::NoAudioStream)?;

        // 输出只支持单声道和立体声
        let target = (config.audio.sample_rate, config.audio.channels.clamp(1, 2));
        let decoder = AudioDecoder::from_stream(stream, target.0, target.1)?;
        let source = decoder.source_config();

        let shared = Arc::new(AudioShared {
            output: Mutex::new(None),
            target: Mutex::new(target),
            buffer: Arc::new(PcmBuffer::new(config.audio.buffer_capacity)),
            clock: PlaybackClock::new(),
            clock_listener: Mutex::new(None),
            events,
            config: config.audio.clone(),
            pause_poll: config.decode.pause_poll(),
        });

        let stage = AudioStage {
            decoder,
            shared: Arc::clone(&shared),
            delivered: false,
            retargeted: false,
        };

        info!("{} 🎵 音频通路就绪: 流 #{}", log_ctx(), index);

        Ok(Self {
            unit: Arc::new(StreamUnit::new(
                MediaKind::Audio,
                index,
                stage,
                config.decode.idle_poll(),
            )),
            shared,
            source,
        })
    }

    /// 主时钟（音频未启动前读数为 0）
    pub fn clock(&self) -> PlaybackClock {
        self.shared.clock.clone()
    }

    /// 源流的采样率和声道数
    pub fn source_config(&self) -> (u32, u16) {
        self.source
    }

    /// 时钟启动时回调（在音频解码线程上调用）
    pub fn set_on_clock_started<F>(&self, listener: F)
    where
        F: Fn(PlaybackClock) + Send + Sync + 'static,
    {
        *self.shared.clock_listener.lock() = Some(Arc::new(listener));
    }

    pub fn set_on_complete<F>(&self, hook: F)
    where
        F: Fn(MediaKind) + Send + Sync + 'static,
    {
        self.unit.set_on_complete(hook);
    }

    fn resume_output(&self) {
        {
            let output = self.shared.output.lock();
            self.shared.clock.resume();
            if let Some(output) = output.as_ref() {
                output.resume();
            }
        }
        self.shared.events.emit(PlayerEvent::AudioResumed);
    }

    /// 播放进度通知线程，解码单元结束后自行退出
    fn spawn_elapsed_ticker(&self) {
        let unit = Arc::clone(&self.unit);
        let shared = Arc::clone(&self.shared);
        let ticker = crossbeam_channel::tick(shared.config.elapsed_tick());

        let spawned = thread::Builder::new()
            .name("audio-elapsed".to_string())
            .spawn(move || {
                for _ in ticker.iter() {
                    match unit.state() {
                        PlaybackState::NoPlay => break,
                        PlaybackState::Playing => shared
                            .events
                            .emit(PlayerEvent::ElapsedTimeChanged(shared.clock.elapsed())),
                        PlaybackState::Paused => {}
                    }
                }
                debug!("播放进度线程退出");
            });

        if let Err(e) = spawned {
            warn!("无法启动播放进度线程: {}", e);
        }
    }
}

impl PlaybackUnit for AudioPath {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn stream_index(&self) -> Option<usize> {
        self.unit.stream_index()
    }

    fn enqueue(&self, packet: ffmpeg::Packet) {
        self.unit.enqueue(packet);
    }

    /// 启动时先打开输出设备，设备不可用则不启动解码线程
    fn play(&self) -> Result<()> {
        if self.unit.state() == PlaybackState::NoPlay {
            self.shared.open_output()?;
        }
        match self.unit.play()? {
            PlayTransition::Started => self.spawn_elapsed_ticker(),
            PlayTransition::Resumed => self.resume_output(),
            PlayTransition::AlreadyPlaying => {}
        }
        Ok(())
    }

    fn resume(&self) -> bool {
        if !self.unit.resume() {
            return false;
        }
        self.resume_output();
        true
    }

    fn pause(&self) {
        if self.unit.pause() {
            let output = self.shared.output.lock();
            self.shared.clock.pause();
            if let Some(output) = output.as_ref() {
                output.pause();
            }
        }
    }

    fn stop(&self) {
        if self.unit.stop() {
            self.shared.clock.pause();
        }
        self.shared.stop_output();
    }

    fn no_more_packets(&self) {
        self.unit.no_more_packets();
    }

    fn state(&self) -> PlaybackState {
        self.unit.state()
    }

    fn dispose(&self) {
        self.unit.dispose();
        if self.shared.output.lock().take().is_some() {
            debug!("{} 🗑️  释放音频输出设备", log_ctx());
        }
        self.shared.buffer.clear();
    }
}
