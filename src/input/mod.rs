/// 视频输入系统 (Frame Sources)
///
/// 解码在管线之外, 这里提供若干基于 `image` 的帧源:
/// - StillImage: 单张图片
/// - Directory:  图片目录 (按文件名排序)
/// - Gif:        GIF 动图
/// - Mjpeg:      Motion-JPEG 文件 (文件输出端写出的格式)
/// - Memory:     内存帧序列 (测试/演示)
pub mod gif;
pub mod memory;
pub mod mjpeg;
pub mod still;

use std::path::{Path, PathBuf};

pub use gif::GifSource;
pub use memory::MemorySource;
pub use mjpeg::{MjpegReader, MjpegSource};
pub use still::{DirectorySource, StillImageSource};

use crate::detection::Frame;
use crate::error::{FrameReadError, SourceOpenError};

/// 帧源接口
///
/// `open` 在 INIT 阶段调用一次; `read` 返回 `Ok(None)` 表示流结束;
/// `close` 在任何退出路径上都会被调用.
pub trait FrameSource: Send {
    fn name(&self) -> String;

    fn open(&mut self) -> Result<(), SourceOpenError>;

    fn read(&mut self) -> Result<Option<Frame>, FrameReadError>;

    fn close(&mut self) {}
}

/// 输入源类型
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputSource {
    Camera(u32),
    Url(String),
    Image(PathBuf),
    Directory(PathBuf),
    Gif(PathBuf),
    Mjpeg(PathBuf),
    Other(PathBuf),
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];

pub(crate) fn is_image_path(path: &Path) -> bool {
    extension(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

impl InputSource {
    /// 纯数字为摄像头序号, 含 `://` 为网络流, 其余按路径处理
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if let Ok(index) = spec.parse::<u32>() {
            return Self::Camera(index);
        }
        if spec.contains("://") {
            return Self::Url(spec.to_string());
        }
        let path = PathBuf::from(spec);
        if path.is_dir() {
            return Self::Directory(path);
        }
        match extension(&path).as_deref() {
            Some("gif") => Self::Gif(path),
            Some("mjpeg" | "mjpg") => Self::Mjpeg(path),
            _ if is_image_path(&path) => Self::Image(path),
            _ => Self::Other(path),
        }
    }
}

/// 按描述创建帧源 (不解码, 只检查是否存在)
pub fn open_source(spec: &str) -> Result<Box<dyn FrameSource>, SourceOpenError> {
    let source = InputSource::parse(spec);
    let path = match &source {
        InputSource::Camera(index) => {
            return Err(SourceOpenError::Unsupported(format!(
                "camera {index}: no capture backend built in, use an image, directory, GIF or MJPEG file"
            )))
        }
        InputSource::Url(url) => {
            return Err(SourceOpenError::Unsupported(format!("network stream {url}")))
        }
        InputSource::Image(p)
        | InputSource::Directory(p)
        | InputSource::Gif(p)
        | InputSource::Mjpeg(p)
        | InputSource::Other(p) => p.clone(),
    };
    if !path.exists() {
        return Err(SourceOpenError::NotFound(path));
    }

    Ok(match source {
        InputSource::Image(p) => Box::new(StillImageSource::new(p)),
        InputSource::Directory(p) => Box::new(DirectorySource::new(p)),
        InputSource::Gif(p) => Box::new(GifSource::new(p)),
        InputSource::Mjpeg(p) => Box::new(MjpegSource::new(p)),
        _ => {
            return Err(SourceOpenError::Unsupported(format!(
                "{}: unsupported container",
                path.display()
            )))
        }
    })
}
