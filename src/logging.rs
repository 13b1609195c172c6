//! 日志初始化
//!
//! `RUST_LOG` 优先; 未设置时默认 `info`, `--verbose` 时 `debug`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(verbose: bool) {
    let default_filter = if verbose { "morph1x=debug,info" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // 重复初始化 (例如测试中) 时忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}
