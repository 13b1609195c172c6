//! GIF 动图帧源

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage};
use tracing::info;

use super::{FrameSource, MemorySource};
use crate::detection::Frame;
use crate::error::{FrameReadError, SourceOpenError};

/// 打开时解码全部帧
pub struct GifSource {
    path: PathBuf,
    frames: Option<MemorySource>,
}

impl GifSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frames: None,
        }
    }
}

impl FrameSource for GifSource {
    fn name(&self) -> String {
        format!("gif:{}", self.path.display())
    }

    fn open(&mut self) -> Result<(), SourceOpenError> {
        let decode_err = |source| SourceOpenError::Decode {
            path: self.path.clone(),
            source,
        };
        let file = File::open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceOpenError::NotFound(self.path.clone()),
            _ => SourceOpenError::Io(e),
        })?;
        let decoder = GifDecoder::new(BufReader::new(file)).map_err(decode_err)?;
        let frames = decoder.into_frames().collect_frames().map_err(decode_err)?;
        if frames.is_empty() {
            return Err(SourceOpenError::Empty(self.path.clone()));
        }

        let images = frames
            .into_iter()
            .map(|f| DynamicImage::ImageRgba8(f.into_buffer()).to_rgb8())
            .collect::<Vec<_>>();
        info!("🎞️  GIF: {} ({} 帧)", self.path.display(), images.len());

        let mut memory = MemorySource::new(self.name(), images);
        memory.open()?;
        self.frames = Some(memory);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>, FrameReadError> {
        match self.frames.as_mut() {
            Some(frames) => frames.read(),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.frames = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame as GifFrame, Rgba, RgbaImage};

    #[test]
    fn test_reads_all_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = GifEncoder::new(file);
            for shade in [0u8, 128, 255] {
                let img = RgbaImage::from_pixel(6, 4, Rgba([shade, shade, shade, 255]));
                encoder
                    .encode_frame(GifFrame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(100, 1)))
                    .unwrap();
            }
        }

        let mut source = GifSource::new(&path);
        source.open().unwrap();
        let mut count = 0;
        while let Some(frame) = source.read().unwrap() {
            assert_eq!(frame.index, count);
            assert_eq!((frame.width(), frame.height()), (6, 4));
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
