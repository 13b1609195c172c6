//! 控制命令 (Commands)
//!
//! 按键 → [`Command`] 的映射表, 以及管线轮询命令用的 [`CommandSource`].

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use phf::phf_map;
use tracing::{debug, info, warn};

/// 用户命令
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Quit,
    Pause,
    Resume,
    TogglePause,
    /// 清空跟踪历史和 FPS 统计
    Reset,
}

/// 按键映射 (q / Esc 退出, p 暂停切换, c 继续, r 重置)
pub static KEY_COMMANDS: phf::Map<char, Command> = phf_map! {
    'q' => Command::Quit,
    '\u{1b}' => Command::Quit,
    'p' => Command::TogglePause,
    'c' => Command::Resume,
    'r' => Command::Reset,
};

/// 单个按键对应的命令, 不区分大小写
pub fn command_for_key(key: char) -> Option<Command> {
    KEY_COMMANDS.get(&key.to_ascii_lowercase()).copied()
}

/// 命令来源, 由管线在每次迭代末尾轮询
pub trait CommandSource: Send {
    /// 最多等待 `wait`, 没有命令时返回 None
    fn poll(&mut self, wait: Duration) -> Option<Command>;
}

impl CommandSource for Receiver<Command> {
    fn poll(&mut self, wait: Duration) -> Option<Command> {
        let received = if wait.is_zero() {
            self.try_recv().map_err(|e| e.is_disconnected())
        } else {
            self.recv_timeout(wait)
                .map_err(|e| matches!(e, RecvTimeoutError::Disconnected))
        };
        match received {
            Ok(cmd) => Some(cmd),
            // 所有发送端都已关闭, 再也等不到继续命令
            Err(true) => Some(Command::Quit),
            Err(false) => None,
        }
    }
}

/// 没有任何输入
pub struct NoCommands;

impl CommandSource for NoCommands {
    fn poll(&mut self, wait: Duration) -> Option<Command> {
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        None
    }
}

/// 从标准输入读取命令 (每行首字符) 并转发到 `tx`
///
/// 标准输入结束后补发一次 [`Command::Resume`], 暂停中的管线不会卡住.
pub fn spawn_stdin_reader(tx: Sender<Command>) {
    let spawned = thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let Some(cmd) = line.trim().chars().next().and_then(command_for_key) else {
                    continue;
                };
                debug!(?cmd, "stdin command");
                if tx.send(cmd).is_err() {
                    return;
                }
            }
            debug!("stdin closed");
            let _ = tx.send(Command::Resume);
        });
    if let Err(e) = spawned {
        warn!("⚠️  无法启动标准输入线程: {}", e);
    }
}

/// Ctrl-C 转成 [`Command::Quit`]; 第二次 Ctrl-C 直接退出进程
pub fn install_interrupt_handler(tx: Sender<Command>) -> Result<(), ctrlc::Error> {
    let interrupted = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            warn!("🛑 再次中断, 强制退出");
            std::process::exit(130);
        }
        info!("🛑 收到中断信号, 正在停止...");
        let _ = tx.send(Command::Quit);
    })
}
