use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{never, select, unbounded, Receiver, Sender};
use log::{debug, info, warn};
use myy_avsync::{MediaPlayer, PlaybackState, PlayerConfig, PlayerEvent};
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

/// 画面延迟每次调整的步长（秒）
const DELAY_STEP: f64 = 0.05;

#[derive(Parser, Debug)]
#[command(name = "myy_avsync")]
#[command(about = "无界面的音视频同步播放器")]
struct Args {
    /// 媒体文件路径
    path: String,

    /// 画面延迟（秒），正值让画面相对声音延后
    #[arg(short, long, allow_hyphen_values = true)]
    delay: Option<f64>,

    /// JSON 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Command {
    TogglePause,
    Stop,
    DelayUp,
    DelayDown,
    Quit,
}

/// 从标准输入读取控制命令
fn spawn_command_reader(tx: Sender<Command>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "p" => Command::TogglePause,
                "s" => Command::Stop,
                "+" => Command::DelayUp,
                "-" => Command::DelayDown,
                "q" => Command::Quit,
                "" => continue,
                other => {
                    warn!("未知命令: {}（p 暂停/恢复, s 停止, +/- 调整画面延迟, q 退出）", other);
                    continue;
                }
            };
            if tx.send(command).is_err() {
                break;
            }
        }
    });
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("🎬 MYY AVSync 启动");

    let config = match &args.config {
        Some(path) => PlayerConfig::from_json_file(path)
            .map_err(|e| anyhow::anyhow!("加载配置失败 {}: {}", path.display(), e))?,
        None => PlayerConfig::default(),
    };

    let mut player = MediaPlayer::new(config);
    if let Some(delay) = args.delay {
        player.set_pic_delay(delay);
    }

    let events = player.subscribe();
    let media_info = player
        .open(&args.path)
        .map_err(|e| anyhow::anyhow!("打开失败: {}", e))?;
    info!(
        "📄 {}x{} @ {:.2} fps | 视频 {} | 音频 {} {} Hz {} 声道 | 时长 {:?}",
        media_info.width,
        media_info.height,
        media_info.fps,
        media_info.video_codec,
        media_info.audio_codec,
        media_info.sample_rate,
        media_info.channels,
        media_info.duration
    );

    player.play()?;

    let (command_tx, command_rx) = unbounded();
    spawn_command_reader(command_tx);

    run_event_loop(&player, &events, command_rx)?;

    player.dispose();
    info!("👋 退出");
    Ok(())
}

fn run_event_loop(
    player: &MediaPlayer,
    events: &Receiver<PlayerEvent>,
    commands: Receiver<Command>,
) -> Result<()> {
    let mut frames: u64 = 0;
    let idle = never();
    let mut stdin_open = true;

    loop {
        let command_source = if stdin_open { &commands } else { &idle };
        select! {
            recv(events) -> event => match event {
                Ok(PlayerEvent::FrameReady(frame)) => {
                    frames += 1;
                    if frames % 100 == 0 {
                        debug!("已显示 {} 帧 (pts={:?}, {}x{})", frames, frame.pts, frame.width, frame.height);
                    }
                }
                Ok(PlayerEvent::ElapsedTimeChanged(elapsed)) => {
                    let total = player.duration().map(|d| format!("{:.1}s", d.as_secs_f64()));
                    info!(
                        "⏱️  {:.1}s / {} | 画面 {} 帧",
                        elapsed.as_secs_f64(),
                        total.as_deref().unwrap_or("?"),
                        frames
                    );
                }
                Ok(PlayerEvent::PlaybackComplete) => {
                    info!("🏁 播放完成，共显示 {} 帧", frames);
                    return Ok(());
                }
                Ok(other) => info!("事件: {:?}", other),
                Err(_) => return Ok(()),
            },
            recv(command_source) -> command => match command {
                Ok(Command::TogglePause) => {
                    if player.current_state() == PlaybackState::Playing {
                        player.pause();
                    } else if let Err(e) = player.play() {
                        warn!("无法继续播放: {}", e);
                    }
                }
                Ok(Command::Stop) => player.stop(),
                Ok(Command::DelayUp) => {
                    player.set_pic_delay(player.pic_delay() + DELAY_STEP);
                    info!("画面延迟: {:.2}s", player.pic_delay());
                }
                Ok(Command::DelayDown) => {
                    player.set_pic_delay(player.pic_delay() - DELAY_STEP);
                    info!("画面延迟: {:.2}s", player.pic_delay());
                }
                Ok(Command::Quit) => return Ok(()),
                // 标准输入已关闭，只等播放结束
                Err(_) => stdin_open = false,
            },
        }
    }
}
