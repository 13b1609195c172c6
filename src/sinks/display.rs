//! 显示输出端
//!
//! 管线线程与窗口线程之间用 crossbeam channel 连接:
//! 帧 → 窗口 (有界, 满了就丢帧), 命令 → 管线.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use image::RgbImage;
use tracing::trace;

use super::{FrameOutput, Sink};
use crate::error::SinkError;
use crate::pipeline::Command;

/// 管线侧
pub struct ChannelDisplay {
    frames: Sender<RgbImage>,
    dropped: u64,
}

/// 窗口侧
pub struct DisplayHandle {
    pub frames: Receiver<RgbImage>,
    pub commands: Sender<Command>,
}

/// 创建显示通道, 返回 (输出端, 窗口句柄, 命令接收端)
pub fn display_channel(capacity: usize) -> (ChannelDisplay, DisplayHandle, Receiver<Command>) {
    let (frame_tx, frame_rx) = bounded(capacity.max(1));
    let (cmd_tx, cmd_rx) = bounded(16);
    (
        ChannelDisplay {
            frames: frame_tx,
            dropped: 0,
        },
        DisplayHandle {
            frames: frame_rx,
            commands: cmd_tx,
        },
        cmd_rx,
    )
}

impl ChannelDisplay {
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Sink for ChannelDisplay {
    fn name(&self) -> &str {
        "display"
    }

    /// 永不阻塞: 窗口来不及取就丢掉这一帧
    fn consume(&mut self, output: &FrameOutput<'_>) -> Result<(), SinkError> {
        match self.frames.try_send(output.rendered.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                trace!(dropped = self.dropped, "display busy, frame dropped");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(SinkError::Disconnected("display window closed".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionSet, PipelineStats};
    use chrono::Utc;

    #[test]
    fn test_drops_when_full_and_detects_close() {
        let (mut display, handle, _commands) = display_channel(1);
        let img = RgbImage::new(2, 2);
        let dets = DetectionSet::new(0, Utc::now(), vec![]);
        let stats = PipelineStats::default();
        let output = FrameOutput {
            rendered: &img,
            detections: &dets,
            stats: &stats,
        };

        display.consume(&output).unwrap();
        display.consume(&output).unwrap();
        assert_eq!(display.dropped(), 1);
        assert!(handle.frames.try_recv().is_ok());

        drop(handle);
        assert!(matches!(
            display.consume(&output),
            Err(SinkError::Disconnected(_))
        ));
    }
}
