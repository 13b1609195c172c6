//! HTTP 推流输出端
//!
//! 每帧编码一次 JPEG, 包装成 multipart 分片后广播给所有观看者.
//! 观看者来不及接收时由 broadcast channel 丢弃旧帧.

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::trace;

use super::{encode_jpeg, FrameOutput, Sink};
use crate::error::SinkError;

/// `/stream` 响应类型
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// 单帧 multipart 分片
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    Bytes::from(chunk)
}

/// 广播输出端
pub struct StreamSink {
    tx: broadcast::Sender<Bytes>,
    quality: u8,
}

impl StreamSink {
    pub fn new(tx: broadcast::Sender<Bytes>, quality: u8) -> Self {
        Self { tx, quality }
    }

    pub fn viewers(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Sink for StreamSink {
    fn name(&self) -> &str {
        "stream"
    }

    fn consume(&mut self, output: &FrameOutput<'_>) -> Result<(), SinkError> {
        // 没有观看者时不编码
        if self.tx.receiver_count() == 0 {
            return Ok(());
        }
        let jpeg = encode_jpeg(output.rendered, self.quality)?;
        let viewers = self.tx.send(multipart_chunk(&jpeg)).unwrap_or(0);
        trace!(viewers, bytes = jpeg.len(), "frame broadcast");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionSet, PipelineStats};
    use chrono::Utc;
    use image::RgbImage;

    #[test]
    fn test_chunk_layout() {
        let chunk = multipart_chunk(&[1, 2, 3]);
        assert_eq!(
            &chunk[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\n\x01\x02\x03\r\n"
        );
    }

    #[test]
    fn test_broadcast_to_all_viewers() {
        let (tx, mut rx1) = broadcast::channel(4);
        let mut rx2 = tx.subscribe();
        let mut sink = StreamSink::new(tx, 70);
        assert_eq!(sink.viewers(), 2);

        let img = RgbImage::new(8, 8);
        let dets = DetectionSet::new(0, Utc::now(), vec![]);
        let stats = PipelineStats::default();
        sink.consume(&FrameOutput {
            rendered: &img,
            detections: &dets,
            stats: &stats,
        })
        .unwrap();

        let a = rx1.try_recv().unwrap();
        let b = rx2.try_recv().unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(b"--frame\r\n"));
    }
}
