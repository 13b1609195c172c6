//! 文件输出端 (File Writer)
//!
//! 编码器按首帧尺寸创建, 之后每帧必须同尺寸.
//! `close` 或 `Drop` 时收尾, 保证任何退出路径都能得到完整文件.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame as GifFrame};
use tracing::{info, warn};

use super::{encode_jpeg, FrameOutput, Sink};
use crate::error::{DimensionMismatchError, SinkError};
use crate::utils::gen_time_string;

/// 输出格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoFormat {
    Mjpeg,
    Gif,
}

impl VideoFormat {
    /// 按扩展名判断, 未知扩展名返回 None
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mjpeg" | "mjpg" => Some(Self::Mjpeg),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mjpeg => "mjpeg",
            Self::Gif => "gif",
        }
    }
}

enum Encoder {
    Mjpeg(BufWriter<File>),
    Gif(GifEncoder<BufWriter<File>>),
}

/// 已打开的编码器
struct Writer {
    encoder: Encoder,
    size: (u32, u32),
}

/// 文件输出端
pub struct FileSink {
    name: String,
    path: PathBuf,
    format: VideoFormat,
    quality: u8,
    fps: u32,
    file: Option<File>,
    writer: Option<Writer>,
    frames_written: u64,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let format = VideoFormat::from_path(&path).ok_or_else(|| {
            SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{}: expected .mjpeg, .mjpg or .gif", path.display()),
            ))
        })?;
        Ok(Self {
            name: format!("file:{}", path.display()),
            path,
            format,
            quality: 85,
            fps: 25,
            file: None,
            writer: None,
            frames_written: 0,
        })
    }

    /// `dir/morph1x_<时间>.mjpeg`
    pub fn timestamped(dir: impl AsRef<Path>, format: VideoFormat) -> Result<Self, SinkError> {
        let file_name = format!("morph1x_{}.{}", gen_time_string("-"), format.extension());
        Self::new(dir.as_ref().join(file_name))
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// GIF 帧间隔
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn start(&mut self, size: (u32, u32)) -> Result<(), SinkError> {
        let file = match self.file.take() {
            Some(file) => file,
            None => File::create(&self.path)?,
        };
        let out = BufWriter::new(file);
        let encoder = match self.format {
            VideoFormat::Mjpeg => Encoder::Mjpeg(out),
            VideoFormat::Gif => {
                let mut gif = GifEncoder::new_with_speed(out, 10);
                gif.set_repeat(Repeat::Infinite)?;
                Encoder::Gif(gif)
            }
        };
        info!("🎬 开始写入 {} ({}x{})", self.path.display(), size.0, size.1);
        self.writer = Some(Writer { encoder, size });
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.file = None;
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        match writer.encoder {
            Encoder::Mjpeg(mut out) => out.flush()?,
            // GIF 结尾在 drop 时写出
            Encoder::Gif(gif) => drop(gif),
        }
        info!(
            "💾 已保存 {} ({} 帧)",
            self.path.display(),
            self.frames_written
        );
        Ok(())
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    /// 创建文件, 路径不可写时尽早失败
    fn open(&mut self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        self.file = Some(File::create(&self.path)?);
        Ok(())
    }

    fn consume(&mut self, output: &FrameOutput<'_>) -> Result<(), SinkError> {
        let frame = output.rendered;
        let actual = frame.dimensions();
        let (quality, delay_ms) = (self.quality, 1000 / self.fps);

        if self.writer.is_none() {
            self.start(actual)?;
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(SinkError::Disconnected(format!("{} is not open", self.name)));
        };
        if writer.size != actual {
            return Err(DimensionMismatchError {
                expected: writer.size,
                actual,
            }
            .into());
        }

        match &mut writer.encoder {
            Encoder::Mjpeg(out) => {
                let jpeg = encode_jpeg(frame, quality)?;
                out.write_all(&jpeg)?;
            }
            Encoder::Gif(gif) => {
                let rgba = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
                gif.encode_frame(GifFrame::from_parts(
                    rgba,
                    0,
                    0,
                    Delay::from_numer_denom_ms(delay_ms, 1),
                ))?;
            }
        }
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.finish()
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("⚠️  关闭输出文件失败 {}: {}", self.path.display(), e);
        }
    }
}
