/// 管线编排 (Pipeline Orchestrator)
///
/// 单线程同步循环, 状态机 `Init → Running ⇄ Paused → Stopped`:
/// - Running: 读帧 → 推理 → 过滤 → 平滑 → 统计 → 渲染 → 分发到各输出端 → 处理命令
/// - Paused:  不读帧, 只等待命令
/// - Stopped: 终态, 无论从哪条路径进入都会释放帧源和所有输出端
///
/// 配置在每帧开头取一次快照, 同一帧内各阶段看到的阈值一致.
pub mod commands;

use std::time::Duration;

use tracing::{debug, error, info, warn};

pub use commands::{
    command_for_key, install_interrupt_handler, spawn_stdin_reader, Command, CommandSource,
    NoCommands, KEY_COMMANDS,
};

use crate::config::ConfigHandle;
use crate::detection::{filter, DetectionAdapter, Frame, PipelineStats, TrackSmoother};
use crate::error::PipelineError;
use crate::input::FrameSource;
use crate::renderer::HudRenderer;
use crate::sinks::{FrameOutput, Sink};
use crate::utils::{resize_frame, validate_frame, FpsMeter};

/// 读帧失败后的最大重试次数 (仅限可恢复错误)
pub const MAX_READ_RETRIES: u32 = 3;
/// 连续推理失败达到该次数后终止
pub const MAX_CONSECUTIVE_INFERENCE_FAILURES: u32 = 5;
/// 暂停时每次等待命令的时长
pub const PAUSE_POLL: Duration = Duration::from_millis(50);
const PROGRESS_EVERY: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Running,
    Paused,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Quit,
}

/// 一次运行的汇总
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub frames_processed: u64,
    /// 读取失败或推理失败而跳过的帧
    pub frames_skipped: u64,
    pub total_detections: u64,
    pub stop_reason: StopReason,
    /// 经历过的状态 (按顺序, 含 Init 和 Stopped)
    pub transitions: Vec<PipelineState>,
}

struct SinkSlot {
    sink: Box<dyn Sink>,
    active: bool,
}

enum Step {
    Continue,
    EndOfStream,
}

/// 管线实例, 独占帧源 / 跟踪状态 / FPS 统计; 模型可与其他实例共享
pub struct Pipeline {
    source: Box<dyn FrameSource>,
    adapter: DetectionAdapter,
    config: ConfigHandle,
    renderer: HudRenderer,
    sinks: Vec<SinkSlot>,
    commands: Box<dyn CommandSource>,
    smoother: TrackSmoother,
    fps: FpsMeter,
    state: PipelineState,
    transitions: Vec<PipelineState>,
    stop_reason: Option<StopReason>,
    frames_processed: u64,
    frames_skipped: u64,
    total_detections: u64,
    inference_failures: u32,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        adapter: DetectionAdapter,
        config: ConfigHandle,
        renderer: HudRenderer,
    ) -> Self {
        let fps_window = config.snapshot().fps_window;
        Self {
            source,
            adapter,
            config,
            renderer,
            sinks: Vec::new(),
            commands: Box::new(NoCommands),
            smoother: TrackSmoother::new(),
            fps: FpsMeter::new(fps_window),
            state: PipelineState::Init,
            transitions: vec![PipelineState::Init],
            stop_reason: None,
            frames_processed: 0,
            frames_skipped: 0,
            total_detections: 0,
            inference_failures: 0,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(SinkSlot { sink, active: true });
        self
    }

    pub fn with_commands(mut self, commands: Box<dyn CommandSource>) -> Self {
        self.commands = commands;
        self
    }

    /// 运行到流结束 / 退出命令 / 致命错误
    pub fn run(mut self) -> Result<RunSummary, PipelineError> {
        let result = match self.open() {
            Ok(()) => self.run_loop(),
            Err(e) => Err(e),
        };
        self.transition(PipelineState::Stopped);
        self.release();

        match result {
            Ok(()) => {
                let summary = RunSummary {
                    frames_processed: self.frames_processed,
                    frames_skipped: self.frames_skipped,
                    total_detections: self.total_detections,
                    stop_reason: self.stop_reason.unwrap_or(StopReason::EndOfStream),
                    transitions: std::mem::take(&mut self.transitions),
                };
                info!(
                    "🏁 处理完成: {} 帧, 跳过 {} 帧, 共 {} 个检测 ({:?})",
                    summary.frames_processed,
                    summary.frames_skipped,
                    summary.total_detections,
                    summary.stop_reason
                );
                Ok(summary)
            }
            Err(e) => {
                error!("❌ 管线终止: {}", e);
                Err(e)
            }
        }
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        self.source.open()?;
        info!("📹 输入源已打开: {}", self.source.name());
        for slot in &mut self.sinks {
            slot.sink.open().map_err(|source| PipelineError::SinkOpen {
                sink: slot.sink.name().to_string(),
                source,
            })?;
            debug!("输出端已打开: {}", slot.sink.name());
        }
        self.transition(PipelineState::Running);
        Ok(())
    }

    fn run_loop(&mut self) -> Result<(), PipelineError> {
        loop {
            match self.state {
                PipelineState::Running => {
                    if let Step::EndOfStream = self.step()? {
                        self.stop_reason = Some(StopReason::EndOfStream);
                        return Ok(());
                    }
                    if let Some(cmd) = self.commands.poll(Duration::ZERO) {
                        self.handle(cmd);
                    }
                }
                PipelineState::Paused => {
                    if let Some(cmd) = self.commands.poll(PAUSE_POLL) {
                        self.handle(cmd);
                    }
                }
                PipelineState::Init | PipelineState::Stopped => return Ok(()),
            }
            if self.stop_reason.is_some() {
                return Ok(());
            }
        }
    }

    /// 处理一帧
    fn step(&mut self) -> Result<Step, PipelineError> {
        let Some(frame) = self.read_frame()? else {
            return Ok(Step::EndOfStream);
        };
        let config = self.config.snapshot();
        let frame = resize_frame(frame, config.frame_resize_limits);

        if self.frames_processed == 0 {
            info!("📐 分辨率: {}x{}", frame.width(), frame.height());
        }

        let raw = match self.adapter.infer(&frame, &config) {
            Ok(raw) => {
                self.inference_failures = 0;
                raw
            }
            Err(source) => {
                self.inference_failures += 1;
                self.frames_skipped += 1;
                if self.inference_failures >= MAX_CONSECUTIVE_INFERENCE_FAILURES {
                    return Err(PipelineError::Inference {
                        consecutive: self.inference_failures,
                        source,
                    });
                }
                warn!("⚠️  帧 #{} 推理失败, 已跳过: {}", frame.index, source);
                return Ok(Step::Continue);
            }
        };

        let kept = filter(&raw, &config);
        let smoothed = self.smoother.update(&kept, &config);
        let fps = self.fps.tick();
        let stats = PipelineStats::new(fps, &smoothed);
        let rendered = self.renderer.render(&frame.image, &smoothed, &stats, &config);

        let output = FrameOutput {
            rendered: &rendered,
            detections: &smoothed,
            stats: &stats,
        };
        for slot in self.sinks.iter_mut().filter(|s| s.active) {
            if let Err(e) = slot.sink.consume(&output) {
                error!("❌ 输出端 {} 出错, 已停用: {}", slot.sink.name(), e);
                slot.active = false;
            }
        }

        self.frames_processed += 1;
        self.total_detections += smoothed.len() as u64;
        if self.frames_processed % PROGRESS_EVERY == 0 {
            info!(
                "📊 帧 #{} | 检测 {} | FPS {:.1}",
                frame.index,
                smoothed.len(),
                fps
            );
        }
        Ok(Step::Continue)
    }

    /// 读一帧; 可恢复错误最多重试 [`MAX_READ_RETRIES`] 次
    fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self.source.read().and_then(|frame| match frame {
                Some(frame) => validate_frame(&frame).map(|()| Some(frame)),
                None => Ok(None),
            });
            match result {
                Ok(frame) => return Ok(frame),
                Err(e) if e.is_transient() && attempts <= MAX_READ_RETRIES => {
                    self.frames_skipped += 1;
                    warn!("⚠️  读帧失败 (第 {} 次): {}", attempts, e);
                }
                Err(source) => return Err(PipelineError::FrameRead { attempts, source }),
            }
        }
    }

    fn handle(&mut self, cmd: Command) {
        debug!(?cmd, state = ?self.state, "command");
        match (cmd, self.state) {
            (Command::Quit, _) => {
                info!("👋 收到退出命令");
                self.stop_reason = Some(StopReason::Quit);
            }
            (Command::Pause | Command::TogglePause, PipelineState::Running) => {
                info!("⏸️  已暂停");
                self.transition(PipelineState::Paused);
            }
            (Command::Resume | Command::TogglePause, PipelineState::Paused) => {
                info!("▶️  继续");
                self.transition(PipelineState::Running);
            }
            (Command::Reset, _) => {
                self.smoother.reset();
                self.fps.reset();
                self.adapter.reset_tracks();
                info!("🔄 跟踪已重置");
            }
            _ => {}
        }
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state == next {
            return;
        }
        debug!("state {:?} → {:?}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }

    fn release(&mut self) {
        self.source.close();
        for slot in &mut self.sinks {
            if let Err(e) = slot.sink.close() {
                warn!("⚠️  关闭输出端 {} 失败: {}", slot.sink.name(), e);
            }
        }
    }
}
