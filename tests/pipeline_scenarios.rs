use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use image::RgbImage;
use parking_lot::Mutex;

use morph1x::config::{ConfigHandle, ConfigUpdate, PipelineConfig};
use morph1x::detection::{DetectionAdapter, DetectionSet, Frame};
use morph1x::error::{FrameReadError, PipelineError, SinkError, SourceOpenError};
use morph1x::input::{FrameSource, MemorySource};
use morph1x::models::{shared, RawDetection, ReplayModel};
use morph1x::pipeline::{Command, CommandSource, Pipeline, PipelineState, StopReason};
use morph1x::renderer::HudRenderer;
use morph1x::sinks::{FileSink, FrameOutput, Sink};

// ---------- 测试替身 ----------

#[derive(Default)]
struct SinkLog {
    frames: Vec<DetectionSet>,
    opened: bool,
    closed: bool,
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<SinkLog>>);

impl Recorder {
    fn sink(&self) -> Box<dyn Sink> {
        Box::new(RecordingSink(self.clone()))
    }

    fn counts(&self) -> Vec<usize> {
        self.0.lock().frames.iter().map(DetectionSet::len).collect()
    }
}

struct RecordingSink(Recorder);

impl Sink for RecordingSink {
    fn name(&self) -> &str {
        "recorder"
    }

    fn open(&mut self) -> Result<(), SinkError> {
        self.0 .0.lock().opened = true;
        Ok(())
    }

    fn consume(&mut self, output: &FrameOutput<'_>) -> Result<(), SinkError> {
        self.0 .0.lock().frames.push(output.detections.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.0 .0.lock().closed = true;
        Ok(())
    }
}

/// 打开或写入时失败的输出端
struct BrokenSink {
    fail_open: bool,
    calls: Arc<Mutex<u32>>,
}

impl Sink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    fn open(&mut self) -> Result<(), SinkError> {
        if self.fail_open {
            return Err(SinkError::Disconnected("no device".into()));
        }
        Ok(())
    }

    fn consume(&mut self, _output: &FrameOutput<'_>) -> Result<(), SinkError> {
        *self.calls.lock() += 1;
        Err(SinkError::Disconnected("peer went away".into()))
    }
}

enum Read {
    Frame,
    Fail(FrameReadError),
}

#[derive(Default)]
struct SourceLog {
    closed: bool,
}

/// 按脚本产生帧或读取错误
struct ScriptedSource {
    script: VecDeque<Read>,
    next_index: u64,
    fail_open: bool,
    log: Arc<Mutex<SourceLog>>,
}

impl ScriptedSource {
    fn new(script: Vec<Read>) -> (Self, Arc<Mutex<SourceLog>>) {
        let log = Arc::new(Mutex::new(SourceLog::default()));
        let source = Self {
            script: script.into(),
            next_index: 0,
            fail_open: false,
            log: Arc::clone(&log),
        };
        (source, log)
    }
}

impl FrameSource for ScriptedSource {
    fn name(&self) -> String {
        "scripted".into()
    }

    fn open(&mut self) -> Result<(), SourceOpenError> {
        if self.fail_open {
            return Err(SourceOpenError::Unsupported("camera:0".into()));
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>, FrameReadError> {
        match self.script.pop_front() {
            None => Ok(None),
            Some(Read::Fail(e)) => Err(e),
            Some(Read::Frame) => {
                let frame = Frame::new(self.next_index, RgbImage::new(32, 32));
                self.next_index += 1;
                Ok(Some(frame))
            }
        }
    }

    fn close(&mut self) {
        self.log.lock().closed = true;
    }
}

/// 每次轮询依次返回脚本中的下一项
struct ScriptedCommands(VecDeque<Option<Command>>);

impl ScriptedCommands {
    fn new(script: Vec<Option<Command>>) -> Box<Self> {
        Box::new(Self(script.into()))
    }
}

impl CommandSource for ScriptedCommands {
    fn poll(&mut self, _wait: Duration) -> Option<Command> {
        self.0.pop_front().flatten()
    }
}

/// 第 `at` 次轮询时更新配置
struct ConfigSwap {
    handle: ConfigHandle,
    update: ConfigUpdate,
    at: usize,
    polls: usize,
}

impl CommandSource for ConfigSwap {
    fn poll(&mut self, _wait: Duration) -> Option<Command> {
        self.polls += 1;
        if self.polls == self.at {
            self.handle.update(&self.update).unwrap();
        }
        None
    }
}

// ---------- 工具函数 ----------

fn raw(bbox: [f32; 4], confidence: f32, track_id: Option<u32>) -> RawDetection {
    RawDetection {
        bbox,
        class_id: 0,
        confidence,
        track_id,
    }
}

fn adapter(model: ReplayModel) -> DetectionAdapter {
    DetectionAdapter::new(shared(Box::new(model.with_classes(vec!["person".into()]))))
}

fn handle(config: PipelineConfig) -> ConfigHandle {
    ConfigHandle::new(config).unwrap()
}

fn pipeline(source: Box<dyn FrameSource>, model: ReplayModel, config: ConfigHandle) -> Pipeline {
    Pipeline::new(source, adapter(model), config, HudRenderer::default())
}

// ---------- 场景 ----------

#[test]
fn scenario_a_overlapping_boxes_collapse() {
    let model = ReplayModel::scripted(vec![vec![
        raw([0.0, 0.0, 10.0, 10.0], 0.9, None),
        raw([1.0, 1.0, 11.0, 11.0], 0.6, None),
    ]]);
    let config = handle(PipelineConfig {
        iou_threshold: 0.3,
        ..PipelineConfig::default()
    });
    let recorder = Recorder::default();
    pipeline(Box::new(MemorySource::blank(1, 32, 32)), model, config)
        .with_sink(recorder.sink())
        .run()
        .unwrap();

    let log = recorder.0.lock();
    assert_eq!(log.frames.len(), 1);
    assert_eq!(log.frames[0].len(), 1);
    assert_eq!(log.frames[0].detections[0].confidence, 0.9);
}

#[test]
fn scenario_b_low_confidence_dropped() {
    let model = ReplayModel::scripted(vec![vec![raw([0.0, 0.0, 10.0, 10.0], 0.4, None)]]);
    let recorder = Recorder::default();
    let summary = pipeline(
        Box::new(MemorySource::blank(1, 32, 32)),
        model,
        handle(PipelineConfig::default()),
    )
    .with_sink(recorder.sink())
    .run()
    .unwrap();

    assert_eq!(recorder.counts(), vec![0]);
    assert_eq!(summary.total_detections, 0);
}

#[test]
fn scenario_c_track_bridged_then_dropped() {
    let seen = vec![raw([2.0, 2.0, 12.0, 12.0], 0.8, Some(7))];
    // 帧 1, 2 可见; 3 起消失
    let model = ReplayModel::scripted(vec![vec![], seen.clone(), seen, vec![], vec![], vec![]]);
    let config = handle(PipelineConfig {
        max_track_age: 2,
        ..PipelineConfig::default()
    });
    let recorder = Recorder::default();
    pipeline(Box::new(MemorySource::blank(6, 32, 32)), model, config)
        .with_sink(recorder.sink())
        .run()
        .unwrap();

    let log = recorder.0.lock();
    let has_seven = |i: usize| log.frames[i].iter().any(|d| d.track_id == Some(7));
    assert!(!has_seven(0));
    assert!(has_seven(1) && has_seven(2));

    let frame3 = &log.frames[3];
    assert_eq!(frame3.len(), 1);
    assert!(frame3.detections[0].interpolated);
    assert!(has_seven(4));
    assert!(!has_seven(5));
}

#[test]
fn scenario_e_config_swap_takes_effect_between_frames() {
    let frames = vec![vec![raw([0.0, 0.0, 10.0, 10.0], 0.6, None)]; 6];
    let model = ReplayModel::scripted(frames);
    let config = handle(PipelineConfig::default());
    let swap = ConfigSwap {
        handle: config.clone(),
        update: ConfigUpdate {
            confidence_threshold: Some(0.7),
            ..ConfigUpdate::default()
        },
        at: 3,
        polls: 0,
    };
    let recorder = Recorder::default();
    pipeline(Box::new(MemorySource::blank(6, 32, 32)), model, config.clone())
        .with_sink(recorder.sink())
        .with_commands(Box::new(swap))
        .run()
        .unwrap();

    assert_eq!(recorder.counts(), vec![1, 1, 1, 0, 0, 0]);
    let snapshot = config.snapshot();
    assert_eq!(snapshot.confidence_threshold, 0.7);
    assert_eq!(snapshot.iou_threshold, PipelineConfig::default().iou_threshold);
}

#[test]
fn rejected_update_keeps_previous_snapshot() {
    let config = handle(PipelineConfig::default());
    let before = config.snapshot();
    let bad = ConfigUpdate {
        confidence_threshold: Some(0.9),
        iou_threshold: Some(1.5),
        ..ConfigUpdate::default()
    };
    assert!(config.update(&bad).is_err());
    assert_eq!(*config.snapshot(), *before);
}

// ---------- 状态机 ----------

#[test]
fn end_of_stream_stops_cleanly() {
    let (source, log) = ScriptedSource::new(vec![Read::Frame, Read::Frame]);
    let recorder = Recorder::default();
    let summary = pipeline(Box::new(source), ReplayModel::scripted(vec![]), handle(PipelineConfig::default()))
        .with_sink(recorder.sink())
        .run()
        .unwrap();

    assert_eq!(summary.frames_processed, 2);
    assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    assert_eq!(
        summary.transitions,
        vec![PipelineState::Init, PipelineState::Running, PipelineState::Stopped]
    );
    assert!(log.lock().closed);
    let sink = recorder.0.lock();
    assert!(sink.opened && sink.closed);
}

#[test]
fn quit_command_stops_after_current_frame() {
    let recorder = Recorder::default();
    let summary = pipeline(
        Box::new(MemorySource::blank(5, 32, 32)),
        ReplayModel::scripted(vec![]),
        handle(PipelineConfig::default()),
    )
    .with_sink(recorder.sink())
    .with_commands(ScriptedCommands::new(vec![None, Some(Command::Quit)]))
    .run()
    .unwrap();

    assert_eq!(summary.frames_processed, 2);
    assert_eq!(summary.stop_reason, StopReason::Quit);
    assert!(recorder.0.lock().closed);
}

/// 读到指定帧时从"另一端"发出退出, 模拟运行中按下 Ctrl-C
struct InterruptAt {
    inner: MemorySource,
    at: u64,
    tx: Sender<Command>,
}

impl FrameSource for InterruptAt {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn open(&mut self) -> Result<(), SourceOpenError> {
        self.inner.open()
    }

    fn read(&mut self) -> Result<Option<Frame>, FrameReadError> {
        let frame = self.inner.read()?;
        if frame.as_ref().is_some_and(|f| f.index == self.at) {
            self.tx.send(Command::Quit).unwrap();
        }
        Ok(frame)
    }
}

#[test]
fn interrupt_mid_run_finalizes_gif() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.gif");
    let (tx, rx) = unbounded();
    let source = InterruptAt {
        inner: MemorySource::blank(20, 32, 32),
        at: 2,
        tx: tx.clone(),
    };

    let summary = pipeline(
        Box::new(source),
        ReplayModel::scripted(vec![]),
        handle(PipelineConfig::default()),
    )
    .with_sink(Box::new(FileSink::new(&path).unwrap()))
    .with_commands(Box::new(rx))
    .run()
    .unwrap();

    assert_eq!(summary.frames_processed, 3);
    assert_eq!(summary.stop_reason, StopReason::Quit);
    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.starts_with(b"GIF89a"));
    assert_eq!(bytes.last(), Some(&0x3B));
}

#[test]
fn closed_command_channel_ends_paused_run() {
    let (tx, rx) = unbounded();
    tx.send(Command::Pause).unwrap();
    drop(tx);

    let run = pipeline(
        Box::new(MemorySource::blank(3, 32, 32)),
        ReplayModel::scripted(vec![]),
        handle(PipelineConfig::default()),
    )
    .with_commands(Box::new(rx));
    let (done_tx, done_rx) = unbounded();
    std::thread::spawn(move || done_tx.send(run.run()).unwrap());

    let summary = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("paused pipeline never stopped")
        .unwrap();
    assert_eq!(summary.frames_processed, 1);
    assert_eq!(summary.stop_reason, StopReason::Quit);
    assert!(summary.transitions.contains(&PipelineState::Paused));
}

#[test]
fn pause_reset_resume() {
    let seen = vec![raw([2.0, 2.0, 12.0, 12.0], 0.8, Some(3))];
    // 帧 0 有轨迹 3, 帧 1 没有; 暂停期间重置后不应再补框
    let model = ReplayModel::scripted(vec![seen, vec![], vec![]]);
    let recorder = Recorder::default();
    let summary = pipeline(
        Box::new(MemorySource::blank(3, 32, 32)),
        model,
        handle(PipelineConfig::default()),
    )
    .with_sink(recorder.sink())
    .with_commands(ScriptedCommands::new(vec![
        Some(Command::Pause),
        Some(Command::Reset),
        None,
        Some(Command::TogglePause),
    ]))
    .run()
    .unwrap();

    assert_eq!(
        summary.transitions,
        vec![
            PipelineState::Init,
            PipelineState::Running,
            PipelineState::Paused,
            PipelineState::Running,
            PipelineState::Stopped,
        ]
    );
    assert_eq!(summary.frames_processed, 3);
    assert_eq!(recorder.counts(), vec![1, 0, 0]);
}

#[test]
fn pause_is_ignored_while_paused_and_quit_works() {
    let summary = pipeline(
        Box::new(MemorySource::blank(4, 32, 32)),
        ReplayModel::scripted(vec![]),
        handle(PipelineConfig::default()),
    )
    .with_commands(ScriptedCommands::new(vec![
        Some(Command::Pause),
        Some(Command::Pause),
        Some(Command::Quit),
    ]))
    .run()
    .unwrap();

    assert_eq!(summary.frames_processed, 1);
    assert_eq!(summary.stop_reason, StopReason::Quit);
    assert_eq!(summary.transitions.last(), Some(&PipelineState::Stopped));
}

// ---------- 错误处理 ----------

#[test]
fn source_open_failure_is_fatal_and_cleaned_up() {
    let (mut source, log) = ScriptedSource::new(vec![Read::Frame]);
    source.fail_open = true;
    let recorder = Recorder::default();
    let err = pipeline(Box::new(source), ReplayModel::scripted(vec![]), handle(PipelineConfig::default()))
        .with_sink(recorder.sink())
        .run()
        .unwrap_err();

    assert!(matches!(err, PipelineError::SourceOpen(_)));
    assert_eq!(err.exit_code(), 1);
    assert!(log.lock().closed);
    assert!(recorder.0.lock().closed);
}

#[test]
fn sink_open_failure_is_fatal() {
    let (source, log) = ScriptedSource::new(vec![Read::Frame]);
    let err = pipeline(Box::new(source), ReplayModel::scripted(vec![]), handle(PipelineConfig::default()))
        .with_sink(Box::new(BrokenSink {
            fail_open: true,
            calls: Arc::default(),
        }))
        .run()
        .unwrap_err();

    assert!(matches!(err, PipelineError::SinkOpen { ref sink, .. } if sink == "broken"));
    assert_eq!(err.exit_code(), 3);
    assert!(log.lock().closed);
}

#[test]
fn transient_read_errors_are_retried() {
    let corrupt = |index| {
        Read::Fail(FrameReadError::Corrupt {
            index,
            reason: "bad".into(),
        })
    };
    let (source, _) = ScriptedSource::new(vec![
        Read::Frame,
        corrupt(1),
        corrupt(2),
        Read::Frame,
    ]);
    let summary = pipeline(Box::new(source), ReplayModel::scripted(vec![]), handle(PipelineConfig::default()))
        .run()
        .unwrap();

    assert_eq!(summary.frames_processed, 2);
    assert_eq!(summary.frames_skipped, 2);
}

#[test]
fn persistent_read_errors_escalate() {
    let script = (0..5)
        .map(|i| {
            Read::Fail(FrameReadError::Corrupt {
                index: i,
                reason: "bad".into(),
            })
        })
        .collect();
    let (source, log) = ScriptedSource::new(script);
    let err = pipeline(Box::new(source), ReplayModel::scripted(vec![]), handle(PipelineConfig::default()))
        .run()
        .unwrap_err();

    assert!(matches!(err, PipelineError::FrameRead { attempts: 4, .. }));
    assert!(log.lock().closed);
}

#[test]
fn non_transient_read_error_escalates_immediately() {
    let (source, _) = ScriptedSource::new(vec![Read::Fail(FrameReadError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "truncated",
    )))]);
    let err = pipeline(Box::new(source), ReplayModel::scripted(vec![]), handle(PipelineConfig::default()))
        .run()
        .unwrap_err();

    assert!(matches!(err, PipelineError::FrameRead { attempts: 1, .. }));
}

#[test]
fn single_inference_failure_skips_frame() {
    let model = ReplayModel::scripted(vec![]).with_failure(1);
    let recorder = Recorder::default();
    let summary = pipeline(
        Box::new(MemorySource::blank(3, 32, 32)),
        model,
        handle(PipelineConfig::default()),
    )
    .with_sink(recorder.sink())
    .run()
    .unwrap();

    assert_eq!(summary.frames_processed, 2);
    assert_eq!(summary.frames_skipped, 1);
    let log = recorder.0.lock();
    let indices: Vec<u64> = log.frames.iter().map(|f| f.frame_index).collect();
    assert_eq!(indices, vec![0, 2]);
}

#[test]
fn consecutive_inference_failures_escalate() {
    let model = (0..5).fold(ReplayModel::scripted(vec![]), |m, i| m.with_failure(i));
    let err = pipeline(
        Box::new(MemorySource::blank(10, 32, 32)),
        model,
        handle(PipelineConfig::default()),
    )
    .run()
    .unwrap_err();

    assert!(matches!(err, PipelineError::Inference { consecutive: 5, .. }));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn inference_timeout_skips_frame() {
    let model = ReplayModel::scripted(vec![]).with_delay(Duration::from_millis(20));
    let adapter = adapter(model).with_timeout(Some(Duration::from_millis(1)));
    let err = Pipeline::new(
        Box::new(MemorySource::blank(5, 32, 32)),
        adapter,
        handle(PipelineConfig::default()),
        HudRenderer::default(),
    )
    .run()
    .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Inference {
            source: morph1x::InferenceError::Timeout { .. },
            ..
        }
    ));
}

#[test]
fn failing_sink_does_not_affect_others() {
    let calls = Arc::new(Mutex::new(0));
    let recorder = Recorder::default();
    let summary = pipeline(
        Box::new(MemorySource::blank(4, 32, 32)),
        ReplayModel::scripted(vec![]),
        handle(PipelineConfig::default()),
    )
    .with_sink(Box::new(BrokenSink {
        fail_open: false,
        calls: Arc::clone(&calls),
    }))
    .with_sink(recorder.sink())
    .run()
    .unwrap();

    assert_eq!(summary.frames_processed, 4);
    // 出错一次后停用
    assert_eq!(*calls.lock(), 1);
    assert_eq!(recorder.0.lock().frames.len(), 4);
}
