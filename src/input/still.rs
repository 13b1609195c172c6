//! 静态图片帧源: 单张图片 / 图片目录

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use super::{is_image_path, FrameSource};
use crate::detection::Frame;
use crate::error::{FrameReadError, SourceOpenError};

/// 单张图片, 输出一帧后结束
pub struct StillImageSource {
    path: PathBuf,
    image: Option<image::RgbImage>,
    done: bool,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            image: None,
            done: false,
        }
    }
}

impl FrameSource for StillImageSource {
    fn name(&self) -> String {
        format!("image:{}", self.path.display())
    }

    fn open(&mut self) -> Result<(), SourceOpenError> {
        if !self.path.exists() {
            return Err(SourceOpenError::NotFound(self.path.clone()));
        }
        let img = image::open(&self.path).map_err(|source| SourceOpenError::Decode {
            path: self.path.clone(),
            source,
        })?;
        self.image = Some(img.to_rgb8());
        self.done = false;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>, FrameReadError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        Ok(self.image.take().map(|img| Frame::new(0, img)))
    }

    fn close(&mut self) {
        self.image = None;
    }
}

/// 图片目录, 按文件名顺序逐帧输出
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectorySource {
    fn name(&self) -> String {
        format!("dir:{}", self.dir.display())
    }

    fn open(&mut self) -> Result<(), SourceOpenError> {
        if !self.dir.is_dir() {
            return Err(SourceOpenError::NotFound(self.dir.clone()));
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image_path(p))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(SourceOpenError::Empty(self.dir.clone()));
        }
        info!("📂 图片目录: {} ({} 帧)", self.dir.display(), files.len());
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>, FrameReadError> {
        let Some(path) = self.files.get(self.cursor).cloned() else {
            return Ok(None);
        };
        let index = self.cursor as u64;
        self.cursor += 1;
        debug!("reading {}", path.display());

        let img = image::open(&path).map_err(|e| FrameReadError::Corrupt {
            index,
            reason: format!("{}: {}", path.display(), e),
        })?;
        Ok(Some(Frame::new(index, img.to_rgb8())))
    }

    fn close(&mut self) {
        self.files.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_directory_sorted_and_skips_bad() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(4, 4, Rgb([2, 2, 2]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(4, 4, Rgb([1, 1, 1]))
            .save(dir.path().join("a.png"))
            .unwrap();
        fs::write(dir.path().join("c.png"), b"not a png").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut source = DirectorySource::new(dir.path());
        source.open().unwrap();
        assert_eq!(source.len(), 3);

        let first = source.read().unwrap().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.image.get_pixel(0, 0), &Rgb([1, 1, 1]));
        let second = source.read().unwrap().unwrap();
        assert_eq!(second.image.get_pixel(0, 0), &Rgb([2, 2, 2]));

        let err = source.read().unwrap_err();
        assert!(err.is_transient());
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = DirectorySource::new(dir.path());
        assert!(matches!(source.open(), Err(SourceOpenError::Empty(_))));
    }

    #[test]
    fn test_still_image_single_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.png");
        RgbImage::new(8, 6).save(&path).unwrap();

        let mut source = StillImageSource::new(&path);
        source.open().unwrap();
        let frame = source.read().unwrap().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert!(source.read().unwrap().is_none());
    }
}
