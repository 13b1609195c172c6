//! IOU 多目标跟踪 (ByteTrack 风格)
//!
//! 为不自带跟踪ID的模型补充稳定的 track id:
//! 1. 高分框优先与预测位置做 IOU 匹配
//! 2. 低分框救援未匹配的轨迹
//! 3. 未匹配的高分框新建轨迹, 丢失太久的轨迹删除

use super::types::BBox;
use crate::models::RawDetection;

// ========== 卡尔曼滤波器 ==========

/// 简化卡尔曼滤波器, 状态: [cx, cy, w, h, vx, vy, vw, vh], 协方差取对角
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: [f32; 8],
    p: [f32; 8],
    /// 过程噪声
    q: f32,
    /// 观测噪声
    r: f32,
    velocity_decay: f32,
}

impl KalmanBoxFilter {
    pub fn new(bbox: &BBox, q: f32, r: f32) -> Self {
        let (cx, cy) = bbox.center();
        Self {
            state: [cx, cy, bbox.width(), bbox.height(), 0.0, 0.0, 0.0, 0.0],
            p: [10.0; 8],
            q,
            r,
            velocity_decay: 0.95,
        }
    }

    /// 匀速模型 + 速度衰减
    pub fn predict(&mut self) {
        for v in &mut self.state[4..] {
            *v *= self.velocity_decay;
        }
        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }
        for p in &mut self.p {
            *p += self.q;
        }
    }

    pub fn update(&mut self, bbox: &BBox) {
        let (cx, cy) = bbox.center();
        let z = [cx, cy, bbox.width(), bbox.height()];

        for i in 0..4 {
            let residual = z[i] - self.state[i];
            let k_pos = self.p[i] / (self.p[i] + self.r);
            let k_vel = self.p[i + 4] / (self.p[i + 4] + self.r * 10.0);

            self.state[i] += k_pos * residual;
            self.state[i + 4] += k_vel * residual;

            self.p[i] *= 1.0 - k_pos;
            self.p[i + 4] *= 1.0 - k_vel;
        }
    }

    /// 当前状态框
    pub fn bbox(&self) -> BBox {
        BBox::from_cxcywh(
            self.state[0],
            self.state[1],
            self.state[2].max(1.0),
            self.state[3].max(1.0),
        )
    }
}

// ========== 跟踪器 ==========

#[derive(Clone, Debug)]
struct Track {
    id: u32,
    class_id: u32,
    kalman: KalmanBoxFilter,
    frames_lost: u32,
}

/// 跟踪参数
#[derive(Clone, Copy, Debug)]
pub struct TrackerParams {
    pub max_lost_frames: u32,
    pub high_score_threshold: f32,
    pub low_score_threshold: f32,
    pub high_iou_threshold: f32,
    pub low_iou_threshold: f32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            max_lost_frames: 30,
            high_score_threshold: 0.4,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.3,
            low_iou_threshold: 0.2,
        }
    }
}

/// IOU 跟踪器
#[derive(Debug)]
pub struct IouTracker {
    tracks: Vec<Track>,
    next_id: u32,
    params: TrackerParams,
}

impl IouTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            params,
        }
    }

    /// 更新轨迹, 返回与输入一一对应的 track id
    ///
    /// 低于低分阈值且未匹配到轨迹的检测返回 None.
    pub fn update(&mut self, detections: &[RawDetection]) -> Vec<Option<u32>> {
        let mut ids = vec![None; detections.len()];

        for track in &mut self.tracks {
            track.kalman.predict();
        }

        let boxes: Vec<BBox> = detections.iter().map(|d| BBox::from_array(d.bbox)).collect();
        let (high, low): (Vec<usize>, Vec<usize>) = (0..detections.len())
            .filter(|&i| detections[i].confidence >= self.params.low_score_threshold)
            .partition(|&i| detections[i].confidence >= self.params.high_score_threshold);

        let mut matched_track = vec![false; self.tracks.len()];

        // 第一轮: 高分检测 + 所有轨迹
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        for (det, track) in self.assign(detections, &boxes, &high, &all_tracks, self.params.high_iou_threshold) {
            matched_track[track] = true;
            ids[det] = Some(self.tracks[track].id);
            self.tracks[track].kalman.update(&boxes[det]);
            self.tracks[track].frames_lost = 0;
        }

        // 第二轮: 低分检测救援未匹配轨迹
        let unmatched: Vec<usize> = (0..self.tracks.len()).filter(|&t| !matched_track[t]).collect();
        for (det, track) in self.assign(detections, &boxes, &low, &unmatched, self.params.low_iou_threshold) {
            matched_track[track] = true;
            ids[det] = Some(self.tracks[track].id);
            self.tracks[track].kalman.update(&boxes[det]);
            self.tracks[track].frames_lost = 0;
        }

        for (track, matched) in self.tracks.iter_mut().zip(&matched_track) {
            if !matched {
                track.frames_lost += 1;
            }
        }

        // 未匹配的高分检测 → 新轨迹
        for &det in &high {
            if ids[det].is_none() {
                let id = self.next_id;
                self.next_id += 1;
                self.tracks.push(Track {
                    id,
                    class_id: detections[det].class_id,
                    kalman: KalmanBoxFilter::new(&boxes[det], 0.1, 0.5),
                    frames_lost: 0,
                });
                ids[det] = Some(id);
            }
        }

        let max_lost = self.params.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        ids
    }

    /// 贪心 IOU 匹配, 只在同类别之间进行
    fn assign(
        &self,
        detections: &[RawDetection],
        boxes: &[BBox],
        det_indices: &[usize],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        let mut candidates = Vec::new();
        for &det in det_indices {
            for &track in track_indices {
                let t = &self.tracks[track];
                if t.class_id != detections[det].class_id {
                    continue;
                }
                let iou = boxes[det].iou(&t.kalman.bbox());
                if iou >= iou_threshold {
                    candidates.push((iou, det, track));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut used_det = Vec::new();
        let mut used_track = Vec::new();
        let mut assignments = Vec::new();
        for (_, det, track) in candidates {
            if !used_det.contains(&det) && !used_track.contains(&track) {
                used_det.push(det);
                used_track.push(track);
                assignments.push((det, track));
            }
        }
        assignments
    }

    /// 为没有 track id 的检测补上 id, 模型自带的 id 保持不变
    pub fn assign_ids(&mut self, detections: &mut [RawDetection]) {
        let untracked: Vec<usize> = (0..detections.len())
            .filter(|&i| detections[i].track_id.is_none())
            .collect();
        if untracked.is_empty() {
            return;
        }
        let pending: Vec<RawDetection> = untracked.iter().map(|&i| detections[i].clone()).collect();
        for (idx, id) in untracked.into_iter().zip(self.update(&pending)) {
            detections[idx].track_id = id;
        }
    }

    /// 参数相同的空白跟踪器
    pub fn fresh(&self) -> Self {
        Self::new(self.params)
    }

    /// 清除全部轨迹 (ID 计数继续递增)
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(TrackerParams::default())
    }
}
