/// 工具模块
/// Utility modules
pub mod fps;
pub mod resize;

pub use fps::FpsMeter;
pub use resize::{resize_frame, validate_frame};

/// 本地时间字符串, 用于默认输出文件名
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = ["%Y", "%m", "%d", "%H", "%M", "%S"].join(delimiter);
    chrono::Local::now().format(&fmt).to_string()
}
