/// Morph1x 预览窗口 (macroquad)
///
/// 管线在工作线程运行, 渲染好的帧经 channel 送到窗口线程;
/// 按键转成命令送回管线: q/Esc 退出, p 暂停/继续, c 继续, r 重置跟踪.
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use macroquad::prelude::*;
use tracing::{error, info, warn};

use morph1x::config::AppConfig;
use morph1x::detection::DetectionAdapter;
use morph1x::input::open_source;
use morph1x::models::{self, shared};
use morph1x::pipeline::{command_for_key, install_interrupt_handler, Command, Pipeline};
use morph1x::renderer::HudRenderer;
use morph1x::sinks::{display_channel, FileSink};
use morph1x::{logging, ConfigHandle, PipelineError};

#[derive(Parser, Debug)]
#[command(author, version, about = "Morph1x 预览窗口", long_about = None)]
struct Args {
    /// 输入源: 图片 / 图片目录 / .gif / .mjpeg
    #[arg(short, long)]
    source: Option<String>,

    /// 配置文件
    #[arg(short, long, default_value = "config/morph1x.json")]
    config: PathBuf,

    /// 同时写出到文件 (.mjpeg / .gif)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 调试日志
    #[arg(short, long)]
    verbose: bool,
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Morph1x".to_owned(),
        window_width: 1280,
        window_height: 720,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    let args = Args::parse();
    logging::init(args.verbose);

    let app = match AppConfig::load(&args.config) {
        Ok(app) => app,
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(3);
        }
    };
    let model = match models::load_model(&app.model) {
        Ok(model) => model,
        Err(e) => {
            error!("❌ 模型加载失败: {:#}", e);
            std::process::exit(3);
        }
    };
    let config = match ConfigHandle::new(app.pipeline.clone()) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(3);
        }
    };
    let source_spec = args.source.unwrap_or_else(|| app.deployment.source.clone());
    let source = match open_source(&source_spec) {
        Ok(source) => source,
        Err(e) => {
            error!("❌ 无法打开输入源: {}", e);
            std::process::exit(1);
        }
    };

    let (display, handle, commands) = display_channel(2);
    if let Err(e) = install_interrupt_handler(handle.commands.clone()) {
        warn!("⚠️  无法安装 Ctrl-C 处理: {}", e);
    }
    let adapter = DetectionAdapter::new(shared(model))
        .with_timeout(app.model.inference_timeout_ms.map(Duration::from_millis))
        .with_tracking(app.model.tracking);
    let renderer = HudRenderer::from_config(&config.snapshot());
    let mut pipeline = Pipeline::new(source, adapter, config, renderer)
        .with_sink(Box::new(display))
        .with_commands(Box::new(commands));
    if let Some(output) = args.output.or(app.deployment.output.clone()) {
        match FileSink::new(&output) {
            Ok(sink) => pipeline = pipeline.with_sink(Box::new(sink)),
            Err(e) => error!("❌ 无法写出 {}: {}", output.display(), e),
        }
    }

    let worker = thread::spawn(move || pipeline.run());
    info!("⌨️  q/Esc 退出 | p 暂停/继续 | r 重置跟踪");

    let mut texture: Option<Texture2D> = None;
    loop {
        // 只显示最新一帧
        if let Some(frame) = handle.frames.try_iter().last() {
            upload(&mut texture, frame);
        }

        while let Some(key) = get_char_pressed() {
            if let Some(cmd) = command_for_key(key) {
                let _ = handle.commands.try_send(cmd);
            }
        }
        if is_key_pressed(KeyCode::Escape) {
            let _ = handle.commands.try_send(Command::Quit);
        }

        clear_background(BLACK);
        if let Some(tex) = &texture {
            draw_fitted(tex);
        }

        if worker.is_finished() {
            break;
        }
        next_frame().await;
    }

    drop(handle);
    let code = match worker.join() {
        Ok(Ok(summary)) => {
            info!("✅ 完成: {} 帧 ({:?})", summary.frames_processed, summary.stop_reason);
            0
        }
        Ok(Err(e)) => exit_code(&e),
        Err(_) => {
            error!("❌ 管线线程异常退出");
            3
        }
    };
    std::process::exit(code);
}

fn exit_code(e: &PipelineError) -> i32 {
    error!("❌ {}", e);
    e.exit_code() as i32
}

/// 帧写入纹理, 尺寸变化时重建
fn upload(texture: &mut Option<Texture2D>, frame: image::RgbImage) {
    let (Ok(w), Ok(h)) = (u16::try_from(frame.width()), u16::try_from(frame.height())) else {
        warn!("⚠️  帧 {}x{} 超出纹理尺寸, 跳过显示", frame.width(), frame.height());
        return;
    };
    let rgba = image::DynamicImage::ImageRgb8(frame).to_rgba8().into_raw();
    match texture {
        Some(tex) if tex.width() == f32::from(w) && tex.height() == f32::from(h) => {
            tex.update(&Image {
                bytes: rgba,
                width: w,
                height: h,
            });
        }
        _ => {
            let tex = Texture2D::from_rgba8(w, h, &rgba);
            tex.set_filter(FilterMode::Linear);
            *texture = Some(tex);
        }
    }
}

/// 等比缩放居中显示
fn draw_fitted(tex: &Texture2D) {
    let scale = (screen_width() / tex.width()).min(screen_height() / tex.height());
    let size = vec2(tex.width() * scale, tex.height() * scale);
    let x = (screen_width() - size.x) / 2.0;
    let y = (screen_height() - size.y) / 2.0;
    draw_texture_ex(
        tex,
        x,
        y,
        WHITE,
        DrawTextureParams {
            dest_size: Some(size),
            ..Default::default()
        },
    );
}
