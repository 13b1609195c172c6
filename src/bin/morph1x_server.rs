/// Morph1x HTTP API
///
/// `GET /health`, `POST /detect`, `GET /stream`, `GET /model/info`,
/// `GET /config/model`, `GET /config/deployment`, `POST /config/update`
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::info;

use morph1x::config::AppConfig;
use morph1x::models::{self, shared};
use morph1x::server::{router, AppState, StreamHub};
use morph1x::logging;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Morph1x HTTP API", long_about = None)]
struct Args {
    /// 配置文件
    #[arg(short, long, default_value = "config/morph1x.json")]
    config: PathBuf,

    /// 覆盖监听地址
    #[arg(long)]
    host: Option<String>,

    /// 覆盖监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 调试日志
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let mut app = AppConfig::load(&args.config)?;
    if let Some(host) = args.host {
        app.deployment.host = host;
    }
    if let Some(port) = args.port {
        app.deployment.port = port;
    }
    app.print_summary();

    let model = models::load_model(&app.model).context("failed to load model")?;
    let addr: SocketAddr = format!("{}:{}", app.deployment.host, app.deployment.port)
        .parse()
        .context("invalid listen address")?;
    info!("🚀 Morph1x API 启动 ({})", app.deployment.environment);
    info!("📦 模型: {}", app.model.name);

    let state = AppState::new(app, shared(model)).context("invalid pipeline config")?;
    let hub = state.hub.clone();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!("🌐 监听 http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .context("server error")?;
    info!("👋 Morph1x API 已关闭");
    Ok(())
}

/// Ctrl-C 后先停掉推流管线, 推流连接随之结束, axum 才能完成优雅关闭
async fn shutdown_signal(hub: StreamHub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("⚠️  无法监听 Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 收到中断信号, 正在关闭...");
    if let Err(e) = tokio::task::spawn_blocking(move || hub.shutdown()).await {
        tracing::warn!("⚠️  推流管线关闭失败: {}", e);
    }
}
