/// Morph1x 命令行检测
///
/// 从图片 / 图片目录 / GIF / Motion-JPEG 读取帧, 检测 + 过滤 + 平滑后渲染 HUD,
/// 可选写出到 `.mjpeg` / `.gif` 文件. 交互模式下从标准输入读取命令:
/// `q` 退出, `p` 暂停/继续, `c` 继续, `r` 重置跟踪.
/// Ctrl-C 等同于 `q`: 管线在下一帧后停止, 输出文件正常收尾.
///
/// 退出码: 0 正常结束, 1 无法打开输入源, 2 推理持续失败, 3 其他错误
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use mimalloc::MiMalloc;
use tracing::{error, info, warn};

use morph1x::config::{AppConfig, ConfigUpdate, ModelKind};
use morph1x::detection::DetectionAdapter;
use morph1x::input::open_source;
use morph1x::models::{self, shared};
use morph1x::pipeline::{install_interrupt_handler, spawn_stdin_reader, Pipeline};
use morph1x::renderer::HudRenderer;
use morph1x::sinks::FileSink;
use morph1x::{logging, ConfigHandle};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Morph1x - 实时目标检测与跟踪", long_about = None)]
struct Args {
    /// 输入源: 图片 / 图片目录 / .gif / .mjpeg (默认取配置文件)
    #[arg(short, long)]
    source: Option<String>,

    /// 模型文件: 回放 JSON 或 ONNX (.onnx)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// 配置文件
    #[arg(short, long, default_value = "config/morph1x.json")]
    config: PathBuf,

    /// 输出文件 (.mjpeg / .gif)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 置信度阈值
    #[arg(long)]
    conf: Option<f32>,

    /// 去重 IOU 阈值
    #[arg(long)]
    iou: Option<f32>,

    /// 只保留这些类别 (可重复或逗号分隔)
    #[arg(long, value_delimiter = ',')]
    classes: Vec<String>,

    /// 轨迹最多丢失帧数
    #[arg(long)]
    max_age: Option<u32>,

    /// 调试日志
    #[arg(short, long)]
    verbose: bool,

    /// 列出模型类别后退出
    #[arg(long)]
    list_classes: bool,

    /// 不读取标准输入命令
    #[arg(long)]
    headless: bool,
}

impl Args {
    fn overrides(&self) -> ConfigUpdate {
        ConfigUpdate {
            confidence_threshold: self.conf,
            iou_threshold: self.iou,
            allowed_classes: (!self.classes.is_empty())
                .then(|| self.classes.iter().map(|c| c.trim().to_string()).collect()),
            max_track_age: self.max_age,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            let code = e
                .downcast_ref::<morph1x::PipelineError>()
                .map(|pe| pe.exit_code())
                .unwrap_or(3);
            ExitCode::from(code)
        }
    }
}

fn run(args: Args) -> Result<()> {
    // 只列类别时不创建配置文件
    let mut app = if args.list_classes {
        AppConfig::read(&args.config)?.unwrap_or_default()
    } else {
        AppConfig::load(&args.config)?
    };
    if let Some(path) = &args.model {
        app.model.kind = match path.extension().and_then(|e| e.to_str()) {
            Some("onnx") => ModelKind::Onnx,
            _ => ModelKind::Replay,
        };
        app.model.path = Some(path.clone());
    }
    app.print_summary();

    let model = models::load_model(&app.model).context("failed to load model")?;

    if args.list_classes {
        for (id, name) in model.class_names().iter().enumerate() {
            println!("{id}: {name}");
        }
        return Ok(());
    }

    let config = ConfigHandle::new(app.pipeline.clone()).context("invalid pipeline config")?;
    let overrides = args.overrides();
    if !overrides.is_empty() {
        config
            .update(&overrides)
            .context("invalid command line override")?;
    }

    let source_spec = args.source.clone().unwrap_or_else(|| app.deployment.source.clone());
    let source = open_source(&source_spec).map_err(morph1x::PipelineError::from)?;

    let timeout = app.model.inference_timeout_ms.map(Duration::from_millis);
    let adapter = DetectionAdapter::new(shared(model))
        .with_timeout(timeout)
        .with_tracking(app.model.tracking);
    let renderer = HudRenderer::from_config(&config.snapshot());

    let mut pipeline = Pipeline::new(source, adapter, config, renderer);
    if let Some(output) = args.output.clone().or(app.deployment.output.clone()) {
        let sink = FileSink::new(&output)
            .with_context(|| format!("cannot write {}", output.display()))?;
        info!("💾 输出文件: {}", output.display());
        pipeline = pipeline.with_sink(Box::new(sink));
    }

    // Ctrl-C 与标准输入共用一个命令通道
    let (tx, rx) = unbounded();
    if let Err(e) = install_interrupt_handler(tx.clone()) {
        warn!("⚠️  无法安装 Ctrl-C 处理: {}", e);
    }
    if !args.headless {
        info!("⌨️  命令: q 退出 | p 暂停/继续 | r 重置跟踪 (回车确认)");
        spawn_stdin_reader(tx);
    }
    pipeline = pipeline.with_commands(Box::new(rx));

    let summary = pipeline.run()?;
    info!(
        "✅ 完成: {} 帧 / {} 个检测 ({:?})",
        summary.frames_processed, summary.total_detections, summary.stop_reason
    );
    Ok(())
}
