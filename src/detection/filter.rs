//! 结果过滤 (Result Filter)
//!
//! 置信度阈值 → 类别白名单 → 同类别NMS去重 → 数量上限.
//! 纯函数, 输出按置信度降序, 相同置信度按输入序号.

use std::collections::BTreeMap;

use super::types::{Detection, DetectionSet};
use crate::config::PipelineConfig;

/// 过滤一帧检测结果
pub fn filter(detections: &DetectionSet, config: &PipelineConfig) -> DetectionSet {
    detections.with_detections(filter_detections(&detections.detections, config))
}

/// 过滤检测列表
pub fn filter_detections(detections: &[Detection], config: &PipelineConfig) -> Vec<Detection> {
    // 1+2. 阈值与白名单 (NaN 置信度不满足 >= 比较, 一并丢弃)
    let candidates: Vec<&Detection> = detections
        .iter()
        .filter(|d| d.confidence >= config.confidence_threshold)
        .filter(|d| config.allows(&d.class_name))
        .collect();

    // 3. 同类别去重
    let keep = suppress_duplicates(&candidates, config.iou_threshold);

    // 4. 排序后截断到上限
    let mut kept: Vec<usize> = (0..candidates.len()).filter(|&i| keep[i]).collect();
    kept.sort_by(|&a, &b| by_confidence_desc(candidates[a], candidates[b]).then(a.cmp(&b)));
    kept.truncate(config.max_detections);

    kept.into_iter().map(|i| candidates[i].clone()).collect()
}

fn by_confidence_desc(a: &Detection, b: &Detection) -> std::cmp::Ordering {
    b.confidence.total_cmp(&a.confidence)
}

/// 非极大值抑制 (按 class_id 分组), 返回每个输入是否保留
///
/// 组内按置信度降序处理, 相同置信度时输入序号小的优先.
/// 与已保留框 IOU 大于阈值的框被抑制.
pub fn suppress_duplicates(detections: &[&Detection], iou_threshold: f32) -> Vec<bool> {
    let mut keep = vec![false; detections.len()];

    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (idx, det) in detections.iter().enumerate() {
        groups.entry(det.class_id).or_default().push(idx);
    }

    for (_, mut indices) in groups {
        indices.sort_by(|&a, &b| by_confidence_desc(detections[a], detections[b]).then(a.cmp(&b)));

        let mut selected: Vec<usize> = Vec::with_capacity(indices.len());
        for idx in indices {
            let suppressed = selected
                .iter()
                .any(|&s| detections[s].bbox.iou(&detections[idx].bbox) > iou_threshold);
            if !suppressed {
                selected.push(idx);
                keep[idx] = true;
            }
        }
    }

    keep
}
