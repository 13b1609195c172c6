/// 检测系统 (Detection System)
///
/// 每帧数据流: 适配器 → 过滤器 → 轨迹平滑
/// - Adapter:  调用模型, 翻译原始输出
/// - Filter:   阈值 / 白名单 / 同类去重
/// - Smoother: 补出短暂丢失的轨迹
/// - Tracker:  为不带ID的模型分配 track id
pub mod adapter;
pub mod filter;
pub mod smoother;
pub mod tracker;
pub mod types;

pub use adapter::DetectionAdapter;
pub use filter::filter;
pub use smoother::{TrackRecord, TrackSmoother};
pub use types::{BBox, Detection, DetectionSet, Frame, PipelineStats};
