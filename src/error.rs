//! 错误类型 (Error taxonomy)
//!
//! 每个阶段有自己的错误类型, 编排层统一折叠为 [`PipelineError`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 视频源打开失败 (fatal at INIT)
#[derive(Error, Debug)]
pub enum SourceOpenError {
    #[error("source not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported source: {0}")]
    Unsupported(String),

    #[error("source contains no frames: {0}")]
    Empty(PathBuf),

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("stream hub is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 读帧失败
#[derive(Error, Debug)]
pub enum FrameReadError {
    #[error("corrupt frame #{index}: {reason}")]
    Corrupt { index: u64, reason: String },

    #[error("frame decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FrameReadError {
    /// 单帧损坏可以重试, 底层 IO 故障一般不行
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Corrupt { .. } | Self::Decode(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
        }
    }
}

/// 推理失败 (recoverable per frame)
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model failure: {0}")]
    Model(String),

    #[error("malformed model output: {0}")]
    Malformed(String),

    #[error("inference took {elapsed_ms}ms, limit is {limit_ms}ms")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// 输出尺寸与首帧不一致
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("frame is {actual:?}, writer was opened at {expected:?}")]
pub struct DimensionMismatchError {
    pub expected: (u32, u32),
    pub actual: (u32, u32),
}

/// 输出端错误
#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatchError),

    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("sink disconnected: {0}")]
    Disconnected(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 配置校验失败, 旧配置保持不变
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid configuration: {field}: {reason}")]
pub struct ConfigValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// 配置文件存在但读不出来 (权限 / 编码 / 被占用)
#[derive(Error, Debug)]
#[error("cannot read config {path}: {source}")]
pub struct ConfigError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// 管线终止原因
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot open source: {0}")]
    SourceOpen(#[from] SourceOpenError),

    #[error("frame read failed after {attempts} attempt(s): {source}")]
    FrameRead {
        attempts: u32,
        #[source]
        source: FrameReadError,
    },

    #[error("{consecutive} consecutive inference failures, last: {source}")]
    Inference {
        consecutive: u32,
        #[source]
        source: InferenceError,
    },

    #[error("sink '{sink}' failed to open: {source}")]
    SinkOpen {
        sink: String,
        #[source]
        source: SinkError,
    },
}

impl PipelineError {
    /// 进程退出码: 1 视频源, 2 推理, 3 其他
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::SourceOpen(_) => 1,
            Self::Inference { .. } => 2,
            Self::FrameRead { .. } | Self::SinkOpen { .. } => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let corrupt = FrameReadError::Corrupt {
            index: 3,
            reason: "truncated".into(),
        };
        assert!(corrupt.is_transient());

        let broken = FrameReadError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(!broken.is_transient());

        let timeout = FrameReadError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(timeout.is_transient());
    }

    #[test]
    fn test_exit_codes() {
        let e = PipelineError::SourceOpen(SourceOpenError::NotFound("x.mp4".into()));
        assert_eq!(e.exit_code(), 1);

        let e = PipelineError::Inference {
            consecutive: 5,
            source: InferenceError::Model("boom".into()),
        };
        assert_eq!(e.exit_code(), 2);
    }
}
