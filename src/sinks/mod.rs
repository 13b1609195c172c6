/// 输出端 (Output Sinks)
///
/// 同一帧渲染结果依次交给每个输出端, 单个输出端出错只会停用它自己.
/// - Display: 通过 channel 送往窗口线程, 并回传按键命令
/// - File:    Motion-JPEG / GIF 文件
/// - Stream:  JPEG 分片广播给 HTTP 观看者
/// - Json:    单张图片检测 (不经过管线)
pub mod display;
pub mod file;
pub mod json;
pub mod stream;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

pub use display::{display_channel, ChannelDisplay, DisplayHandle};
pub use file::{FileSink, VideoFormat};
pub use json::{DetectResponse, DetectionRecord, JsonResponder};
pub use stream::{multipart_chunk, StreamSink, MJPEG_CONTENT_TYPE};

use crate::detection::{DetectionSet, PipelineStats};
use crate::error::SinkError;

/// 一帧的全部输出
pub struct FrameOutput<'a> {
    pub rendered: &'a RgbImage,
    pub detections: &'a DetectionSet,
    pub stats: &'a PipelineStats,
}

/// 输出端接口
pub trait Sink: Send {
    fn name(&self) -> &str;

    /// INIT 阶段获取资源, 失败则管线不启动
    fn open(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn consume(&mut self, output: &FrameOutput<'_>) -> Result<(), SinkError>;

    /// STOPPED 时释放资源, 任何退出路径都会调用
    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// RGB → JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::with_capacity((image.width() * image.height() / 4) as usize);
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode_image(image)?;
    Ok(buf)
}
