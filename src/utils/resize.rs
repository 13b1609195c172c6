//! 帧尺寸处理: 校验 + 等比缩小

use fast_image_resize as fr;
use image::imageops::FilterType;
use image::RgbImage;
use tracing::warn;

use crate::config::ResizeLimits;
use crate::detection::Frame;
use crate::error::FrameReadError;

/// 拒绝空帧
pub fn validate_frame(frame: &Frame) -> Result<(), FrameReadError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(FrameReadError::Corrupt {
            index: frame.index,
            reason: format!("empty frame {}x{}", frame.width(), frame.height()),
        });
    }
    Ok(())
}

/// 适配上限后的尺寸; 不放大
pub fn fit_within(width: u32, height: u32, limits: ResizeLimits) -> (u32, u32) {
    if width <= limits.max_width && height <= limits.max_height {
        return (width, height);
    }
    let r = (limits.max_width as f32 / width as f32).min(limits.max_height as f32 / height as f32);
    (
        ((width as f32 * r).round() as u32).clamp(1, limits.max_width),
        ((height as f32 * r).round() as u32).clamp(1, limits.max_height),
    )
}

/// 超过上限的帧等比缩小, 否则原样返回
pub fn resize_frame(frame: Frame, limits: ResizeLimits) -> Frame {
    let (w, h) = fit_within(frame.width(), frame.height(), limits);
    if (w, h) == (frame.width(), frame.height()) {
        return frame;
    }
    Frame {
        image: resize_image(&frame.image, w, h),
        ..frame
    }
}

/// fast_image_resize 双线性缩放, 失败时退回 image 自带实现
pub fn resize_image(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    match resize_fast(src, width, height) {
        Ok(img) => img,
        Err(e) => {
            warn!("⚠️  fast resize failed ({}), falling back to imageops", e);
            image::imageops::resize(src, width, height, FilterType::Triangle)
        }
    }
}

fn resize_fast(src: &RgbImage, width: u32, height: u32) -> anyhow::Result<RgbImage> {
    let src_image = fr::images::Image::from_vec_u8(
        src.width(),
        src.height(),
        src.as_raw().clone(),
        fr::PixelType::U8x3,
    )?;
    let mut dst_image = fr::images::Image::new(width, height, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    resizer.resize(
        &src_image,
        &mut dst_image,
        &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
    )?;

    RgbImage::from_raw(width, height, dst_image.into_vec())
        .ok_or_else(|| anyhow::anyhow!("resized buffer has wrong length"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HD: ResizeLimits = ResizeLimits {
        max_width: 1280,
        max_height: 720,
    };

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(1920, 1080, HD), (1280, 720));
        assert_eq!(fit_within(640, 480, HD), (640, 480));
        assert_eq!(fit_within(2000, 500, HD), (1280, 320));
    }

    #[test]
    fn test_resize_frame() {
        let frame = Frame::new(3, RgbImage::from_pixel(2560, 1440, image::Rgb([10, 20, 30])));
        let out = resize_frame(frame, HD);
        assert_eq!((out.width(), out.height()), (1280, 720));
        assert_eq!(out.index, 3);
        assert_eq!(out.image.get_pixel(600, 300), &image::Rgb([10, 20, 30]));
    }

    #[test]
    fn test_small_frame_untouched() {
        let frame = Frame::new(0, RgbImage::new(320, 240));
        let out = resize_frame(frame, HD);
        assert_eq!((out.width(), out.height()), (320, 240));
    }

    #[test]
    fn test_validate_frame() {
        assert!(validate_frame(&Frame::new(0, RgbImage::new(0, 10))).is_err());
        assert!(validate_frame(&Frame::new(0, RgbImage::new(1, 1))).is_ok());
    }
}
