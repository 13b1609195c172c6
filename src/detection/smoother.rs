//! 轨迹连续性平滑 (Track continuity smoother)
//!
//! 目标短暂丢失 1-2 帧时, 用最后已知位置补出插值框, 减少画面闪烁.

use std::collections::{HashMap, VecDeque};

use super::types::{BBox, Detection, DetectionSet};
use crate::config::PipelineConfig;

/// 单条轨迹记录
#[derive(Clone, Debug)]
pub struct TrackRecord {
    /// 最近的检测 (最新在尾部)
    history: VecDeque<Detection>,
    /// 连续未出现帧数
    pub frames_since_last_seen: u32,
}

impl TrackRecord {
    fn new(detection: Detection, capacity: usize) -> Self {
        let mut history = VecDeque::with_capacity(capacity);
        history.push_back(detection);
        Self {
            history,
            frames_since_last_seen: 0,
        }
    }

    fn observe(&mut self, detection: Detection, capacity: usize) {
        self.history.push_back(detection);
        while self.history.len() > capacity.max(1) {
            self.history.pop_front();
        }
        self.frames_since_last_seen = 0;
    }

    /// 最后一次实际看到的检测
    pub fn last(&self) -> Option<&Detection> {
        self.history.back()
    }

    pub fn last_bbox(&self) -> Option<BBox> {
        self.last().map(|d| d.bbox)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

/// 平滑器, 每个管线实例独占一份
#[derive(Debug, Default)]
pub struct TrackSmoother {
    tracks: HashMap<u32, TrackRecord>,
}

impl TrackSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新轨迹并返回平滑后的结果
    ///
    /// 输出顺序: 本帧检测 (保持输入顺序), 然后按 track id 升序的插值框.
    pub fn update(&mut self, detections: &DetectionSet, config: &PipelineConfig) -> DetectionSet {
        let capacity = config.max_track_history;
        let mut seen = Vec::new();

        for det in &detections.detections {
            if let Some(id) = det.track_id {
                seen.push(id);
                match self.tracks.get_mut(&id) {
                    Some(record) => record.observe(det.clone(), capacity),
                    None => {
                        self.tracks.insert(id, TrackRecord::new(det.clone(), capacity));
                    }
                }
            }
        }

        let mut absent: Vec<u32> = self
            .tracks
            .keys()
            .copied()
            .filter(|id| !seen.contains(id))
            .collect();
        absent.sort_unstable();

        let mut output = detections.detections.clone();
        for id in absent {
            let Some(record) = self.tracks.get_mut(&id) else {
                continue;
            };
            record.frames_since_last_seen += 1;
            if record.frames_since_last_seen > config.max_track_age {
                self.tracks.remove(&id);
                continue;
            }
            if let Some(last) = record.last() {
                let mut ghost = last.clone();
                ghost.interpolated = true;
                output.push(ghost);
            }
        }

        detections.with_detections(output)
    }

    /// 清除全部轨迹
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, id: u32) -> Option<&TrackRecord> {
        self.tracks.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(index: u64, dets: Vec<Detection>) -> DetectionSet {
        DetectionSet::new(index, Utc::now(), dets)
    }

    fn person(id: u32, x: f32) -> Detection {
        Detection::new(BBox::new(x, 0.0, x + 10.0, 10.0), 0.9, 0, "person").with_track(id)
    }

    fn config(max_age: u32) -> PipelineConfig {
        PipelineConfig {
            max_track_age: max_age,
            ..Default::default()
        }
    }

    #[test]
    fn test_interpolates_until_max_age() {
        let cfg = config(2);
        let mut smoother = TrackSmoother::new();

        smoother.update(&frame(1, vec![person(7, 0.0)]), &cfg);
        smoother.update(&frame(2, vec![person(7, 2.0)]), &cfg);

        // 第3帧缺失: 用最后位置补出
        let out = smoother.update(&frame(3, vec![]), &cfg);
        assert_eq!(out.len(), 1);
        assert!(out.detections[0].interpolated);
        assert_eq!(out.detections[0].track_id, Some(7));
        assert_eq!(out.detections[0].bbox.x1, 2.0);

        let out = smoother.update(&frame(4, vec![]), &cfg);
        assert_eq!(out.len(), 1);

        // 第5帧超过 max_age, 轨迹删除
        let out = smoother.update(&frame(5, vec![]), &cfg);
        assert!(out.is_empty());
        assert_eq!(smoother.track_count(), 0);
    }

    #[test]
    fn test_zero_max_age_never_interpolates() {
        let cfg = config(0);
        let mut smoother = TrackSmoother::new();
        smoother.update(&frame(1, vec![person(1, 0.0)]), &cfg);
        assert!(smoother.update(&frame(2, vec![]), &cfg).is_empty());
    }

    #[test]
    fn test_untracked_pass_through() {
        let cfg = config(2);
        let mut smoother = TrackSmoother::new();
        let loose = Detection::new(BBox::new(0.0, 0.0, 5.0, 5.0), 0.8, 2, "car");
        let out = smoother.update(&frame(1, vec![loose.clone()]), &cfg);
        assert_eq!(out.detections, vec![loose]);
        assert_eq!(smoother.track_count(), 0);

        // 下一帧不会补出未跟踪的目标
        assert!(smoother.update(&frame(2, vec![]), &cfg).is_empty());
    }

    #[test]
    fn test_output_order() {
        let cfg = config(3);
        let mut smoother = TrackSmoother::new();
        smoother.update(
            &frame(1, vec![person(9, 0.0), person(3, 20.0), person(5, 40.0)]),
            &cfg,
        );
        let out = smoother.update(&frame(2, vec![person(5, 41.0)]), &cfg);
        let ids: Vec<Option<u32>> = out.iter().map(|d| d.track_id).collect();
        assert_eq!(ids, vec![Some(5), Some(3), Some(9)]);
        assert!(!out.detections[0].interpolated);
        assert!(out.detections[1].interpolated && out.detections[2].interpolated);
    }

    #[test]
    fn test_reappearance_resets_age() {
        let cfg = config(1);
        let mut smoother = TrackSmoother::new();
        smoother.update(&frame(1, vec![person(4, 0.0)]), &cfg);
        smoother.update(&frame(2, vec![]), &cfg);
        smoother.update(&frame(3, vec![person(4, 1.0)]), &cfg);
        assert_eq!(smoother.track(4).unwrap().frames_since_last_seen, 0);
        assert_eq!(smoother.update(&frame(4, vec![]), &cfg).len(), 1);
    }

    #[test]
    fn test_history_bounded_and_reset() {
        let cfg = PipelineConfig {
            max_track_history: 3,
            ..config(5)
        };
        let mut smoother = TrackSmoother::new();
        for i in 0..10 {
            smoother.update(&frame(i, vec![person(1, i as f32)]), &cfg);
        }
        let record = smoother.track(1).unwrap();
        assert_eq!(record.history_len(), 3);
        assert_eq!(record.last_bbox().unwrap().x1, 9.0);

        smoother.reset();
        assert_eq!(smoother.track_count(), 0);
        assert!(smoother.update(&frame(11, vec![]), &cfg).is_empty());
    }
}
