//! 内存帧序列

use image::RgbImage;

use super::FrameSource;
use crate::detection::Frame;
use crate::error::{FrameReadError, SourceOpenError};

/// 逐帧输出预先准备好的图像
pub struct MemorySource {
    label: String,
    frames: Vec<RgbImage>,
    cursor: usize,
}

impl MemorySource {
    pub fn new(label: impl Into<String>, frames: Vec<RgbImage>) -> Self {
        Self {
            label: label.into(),
            frames,
            cursor: 0,
        }
    }

    /// `count` 帧纯色图像
    pub fn blank(count: usize, width: u32, height: u32) -> Self {
        Self::new("blank", vec![RgbImage::new(width, height); count])
    }

    pub fn remaining(&self) -> usize {
        self.frames.len().saturating_sub(self.cursor)
    }
}

impl FrameSource for MemorySource {
    fn name(&self) -> String {
        format!("memory:{}", self.label)
    }

    fn open(&mut self) -> Result<(), SourceOpenError> {
        self.cursor = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>, FrameReadError> {
        let Some(image) = self.frames.get(self.cursor) else {
            return Ok(None);
        };
        let frame = Frame::new(self.cursor as u64, image.clone());
        self.cursor += 1;
        Ok(Some(frame))
    }
}
