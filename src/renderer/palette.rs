//! 类别配色

use image::Rgb;

/// 预定义颜色表
const BRIGHT: [[u8; 3]; 10] = [
    [255, 64, 64],   // 红色
    [64, 255, 64],   // 绿色
    [64, 64, 255],   // 蓝色
    [255, 255, 64],  // 黄色
    [255, 64, 255],  // 品红
    [64, 255, 255],  // 青色
    [255, 128, 0],   // 橙色
    [128, 0, 255],   // 紫色
    [255, 128, 192], // 粉色
    [128, 255, 128], // 浅绿
];

pub fn bright(class_id: u32) -> Rgb<u8> {
    Rgb(BRIGHT[class_id as usize % BRIGHT.len()])
}

/// 黄金角度采样, 相邻ID色相差异最大
pub fn golden_angle(class_id: u32) -> Rgb<u8> {
    let hue = (class_id as f32 * 137.508) % 360.0;
    hsv_to_rgb(hue, 0.8, 0.9)
}

/// HSV转RGB
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let to_u8 = |f: f32| ((f + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb([to_u8(r), to_u8(g), to_u8(b)])
}
