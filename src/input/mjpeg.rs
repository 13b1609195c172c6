//! Motion-JPEG 帧源
//!
//! 文件是首尾相接的完整 JPEG, 以 SOI (FF D8) / EOI (FF D9) 切分.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

use image::ImageFormat;

use super::FrameSource;
use crate::detection::Frame;
use crate::error::{FrameReadError, SourceOpenError};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const CHUNK: usize = 64 * 1024;

/// 从字节流中逐个切出 JPEG
pub struct MjpegReader<R> {
    inner: R,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: Read> MjpegReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(CHUNK),
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let mut chunk = [0u8; CHUNK];
        let n = self.inner.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(true)
    }

    /// 下一张 JPEG; 结尾不完整的数据视为流结束
    pub fn next_jpeg(&mut self) -> io::Result<Option<Vec<u8>>> {
        // 定位 SOI
        loop {
            if let Some(pos) = find(&self.buf, &SOI, 0) {
                self.buf.drain(..pos);
                break;
            }
            // 保留最后一个字节, 防止标记跨块
            let keep = self.buf.len().min(1);
            self.buf.drain(..self.buf.len() - keep);
            if !self.fill()? {
                return Ok(None);
            }
        }

        // 定位 EOI
        let mut from = SOI.len();
        loop {
            if let Some(pos) = find(&self.buf, &EOI, from) {
                let end = pos + EOI.len();
                let jpeg: Vec<u8> = self.buf.drain(..end).collect();
                return Ok(Some(jpeg));
            }
            from = self.buf.len().saturating_sub(1).max(SOI.len());
            if !self.fill()? {
                self.buf.clear();
                return Ok(None);
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Motion-JPEG 文件帧源
pub struct MjpegSource {
    path: PathBuf,
    reader: Option<MjpegReader<BufReader<File>>>,
    next_index: u64,
}

impl MjpegSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            next_index: 0,
        }
    }
}

impl FrameSource for MjpegSource {
    fn name(&self) -> String {
        format!("mjpeg:{}", self.path.display())
    }

    fn open(&mut self) -> Result<(), SourceOpenError> {
        let file = File::open(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SourceOpenError::NotFound(self.path.clone()),
            _ => SourceOpenError::Io(e),
        })?;
        self.reader = Some(MjpegReader::new(BufReader::new(file)));
        self.next_index = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>, FrameReadError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let Some(jpeg) = reader.next_jpeg()? else {
            return Ok(None);
        };
        let index = self.next_index;
        self.next_index += 1;

        let img = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).map_err(|e| {
            FrameReadError::Corrupt {
                index,
                reason: e.to_string(),
            }
        })?;
        Ok(Some(Frame::new(index, img.to_rgb8())))
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_split_concatenated() {
        let mut data = vec![0x00, 0x11];
        data.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        data.extend_from_slice(&[0xFF, 0xD8, 4, 0xFF, 0xD9]);
        data.extend_from_slice(&[0xFF, 0xD8, 5]); // 截断

        let mut reader = MjpegReader::new(Cursor::new(data));
        assert_eq!(
            reader.next_jpeg().unwrap().unwrap(),
            vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]
        );
        assert_eq!(reader.next_jpeg().unwrap().unwrap(), vec![0xFF, 0xD8, 4, 0xFF, 0xD9]);
        assert!(reader.next_jpeg().unwrap().is_none());
    }

    #[test]
    fn test_markers_across_reads() {
        // 每次只读一个字节
        struct Trickle(Vec<u8>, usize);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.1 >= self.0.len() {
                    return Ok(0);
                }
                buf[0] = self.0[self.1];
                self.1 += 1;
                Ok(1)
            }
        }
        let data = vec![0xFF, 0xD8, 9, 0xFF, 0xD9, 0xFF, 0xD8, 0xFF, 0xD9];
        let mut reader = MjpegReader::new(Trickle(data, 0));
        assert_eq!(reader.next_jpeg().unwrap().unwrap().len(), 5);
        assert_eq!(reader.next_jpeg().unwrap().unwrap().len(), 4);
        assert!(reader.next_jpeg().unwrap().is_none());
    }
}
