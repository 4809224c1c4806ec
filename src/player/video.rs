use crate::core::{MediaKind, PlaybackClock, PlaybackState, PlayerConfig, PlayerError, Result, StateCell, VideoFrame};
use crate::player::decoder::VideoDecoder;
use crate::player::demuxer::Demuxer;
use crate::player::events::{EventBus, PlayerEvent};
use crate::player::log_ctx;
use crate::player::sync::{AtomicSeconds, ClockSlot, SyncPolicy, VideoPacer};
use crate::player::unit::{DecodeStage, FinishReason, PlaybackUnit, StageFlow, StreamUnit};
use ffmpeg_next as ffmpeg;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

struct VideoStage {
    decoder: VideoDecoder,
    pacer: VideoPacer,
    events: EventBus,
    pause_poll: Duration,
    emitted: usize,
}

impl VideoStage {
    /// 返回 false 表示播放已停止
    fn deliver(&mut self, frame: VideoFrame, state: &StateCell) -> bool {
        if !state.wait_while_paused(self.pause_poll) {
            return false;
        }
        if self.pacer.pace(frame.pts, state) {
            self.emitted += 1;
            self.events.emit(PlayerEvent::FrameReady(Arc::new(frame)));
        }
        !state.is_stopped()
    }

    fn deliver_all(&mut self, frames: Vec<VideoFrame>, state: &StateCell) {
        for frame in frames {
            if !self.deliver(frame, state) {
                break;
            }
        }
    }
}

impl DecodeStage for VideoStage {
    type Packet = ffmpeg::Packet;

    fn process(&mut self, packet: ffmpeg::Packet, state: &StateCell) -> StageFlow {
        match self.decoder.decode(&packet) {
            Ok(frames) => {
                self.deliver_all(frames, state);
                StageFlow::Continue
            }
            Err(PlayerError::ConvertError(e)) => {
                error!("{} ❌ 视频转换失败: {}", log_ctx(), e);
                StageFlow::Abort
            }
            Err(e) => {
                warn!("丢弃视频包 (pts={:?}): {}", packet.pts(), e);
                StageFlow::Continue
            }
        }
    }

    fn finish(&mut self, state: &StateCell, reason: FinishReason) {
        if reason == FinishReason::EndOfInput {
            match self.decoder.flush() {
                Ok(frames) => self.deliver_all(frames, state),
                Err(e) => warn!("视频解码器 flush 失败: {}", e),
            }
        }
        info!(
            "{} 视频输出 {} 帧，丢弃 {} 帧",
            log_ctx(),
            self.emitted,
            self.pacer.dropped_frames()
        );
    }
}

/// 视频通路：按音频时钟节拍交付 RGBA 帧
pub struct VideoPath {
    unit: Arc<StreamUnit<VideoStage>>,
    clock: ClockSlot,
    dimensions: (u32, u32),
}

impl VideoPath {
    pub fn init(
        demuxer: &Demuxer,
        config: &PlayerConfig,
        events: EventBus,
        delay: Arc<AtomicSeconds>,
    ) -> Result<Self> {
        let index = demuxer
            .best_stream_index(MediaKind::Video)
            .ok_or(PlayerError::NoVideoStream)?;
        let stream = demuxer.stream(index).ok_or(PlayerError::NoVideoStream)?;
        let decoder = VideoDecoder::from_stream(stream)?;
        let dimensions = (decoder.width(), decoder.height());

        let clock = ClockSlot::new();
        let policy = SyncPolicy {
            drop_threshold: config.video.drop_threshold_secs,
            ahead_delay_scale_ms: config.video.ahead_delay_scale_ms,
            max_wait: config.video.max_ahead_wait(),
        };
        let pacer = VideoPacer::new(
            clock.clone(),
            delay,
            policy,
            config.video.clock_poll(),
        );

        let stage = VideoStage {
            decoder,
            pacer,
            events,
            pause_poll: config.decode.pause_poll(),
            emitted: 0,
        };

        info!(
            "{} 🎞️  视频通路就绪: 流 #{}, {}x{}",
            log_ctx(),
            index,
            dimensions.0,
            dimensions.1
        );

        Ok(Self {
            unit: Arc::new(StreamUnit::new(
                MediaKind::Video,
                index,
                stage,
                config.decode.idle_poll(),
            )),
            clock,
            dimensions,
        })
    }

    /// 绑定主时钟（音频时钟启动时调用）
    pub fn bind_clock(&self, clock: PlaybackClock) {
        debug!("视频通路绑定主时钟");
        self.clock.bind(clock);
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    pub fn set_on_complete<F>(&self, hook: F)
    where
        F: Fn(MediaKind) + Send + Sync + 'static,
    {
        self.unit.set_on_complete(hook);
    }
}

impl PlaybackUnit for VideoPath {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn stream_index(&self) -> Option<usize> {
        self.unit.stream_index()
    }

    fn enqueue(&self, packet: ffmpeg::Packet) {
        self.unit.enqueue(packet);
    }

    fn play(&self) -> Result<()> {
        self.unit.play().map(|_| ())
    }

    fn resume(&self) -> bool {
        self.unit.resume()
    }

    fn pause(&self) {
        self.unit.pause();
    }

    fn stop(&self) {
        self.unit.stop();
    }

    fn no_more_packets(&self) {
        self.unit.no_more_packets();
    }

    fn state(&self) -> PlaybackState {
        self.unit.state()
    }

    fn dispose(&self) {
        self.unit.dispose();
        self.clock.clear();
    }
}
