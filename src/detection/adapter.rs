//! 检测适配器 (Detection Adapter)
//!
//! 调用外部模型并把原始输出翻译成 [`Detection`].
//! 模型实例在管线间共享; 跟踪状态属于各自的适配器, 互不干扰.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use super::tracker::IouTracker;
use super::types::{BBox, Detection, DetectionSet, Frame};
use crate::config::PipelineConfig;
use crate::error::InferenceError;
use crate::models::{ModelInfo, RawDetection, SharedModel, Thresholds};

/// 检测适配器
///
/// `clone` 共享跟踪状态 (同一条管线内使用), [`fork`](Self::fork) 得到独立的跟踪状态.
#[derive(Clone)]
pub struct DetectionAdapter {
    model: SharedModel,
    timeout: Option<Duration>,
    tracker: Option<Arc<Mutex<IouTracker>>>,
}

impl DetectionAdapter {
    pub fn new(model: SharedModel) -> Self {
        Self {
            model,
            timeout: None,
            tracker: None,
        }
    }

    /// 为模型没有给出 id 的检测补充 IOU 跟踪
    pub fn with_tracking(mut self, enabled: bool) -> Self {
        self.tracker = enabled.then(|| Arc::new(Mutex::new(IouTracker::default())));
        self
    }

    /// 共享同一个模型, 跟踪从空白开始
    pub fn fork(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            timeout: self.timeout,
            tracker: self
                .tracker
                .as_ref()
                .map(|t| Arc::new(Mutex::new(t.lock().fresh()))),
        }
    }

    /// 清除本适配器的轨迹, 其他管线不受影响
    pub fn reset_tracks(&self) {
        if let Some(tracker) = &self.tracker {
            tracker.lock().reset();
        }
    }

    pub fn info(&self) -> ModelInfo {
        let mut info = self.model.lock().info();
        info.tracking |= self.tracker.is_some();
        info
    }

    /// 推理耗时超过上限时, 该帧结果作废
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    pub fn infer(&self, frame: &Frame, config: &PipelineConfig) -> Result<DetectionSet, InferenceError> {
        self.infer_timed(frame, config).map(|(set, _)| set)
    }

    /// 推理并返回模型调用耗时 (不含等待共享模型的时间)
    pub fn infer_timed(
        &self,
        frame: &Frame,
        config: &PipelineConfig,
    ) -> Result<(DetectionSet, Duration), InferenceError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(InferenceError::InvalidFrame(format!(
                "frame #{} is {}x{}",
                frame.index,
                frame.width(),
                frame.height()
            )));
        }

        let thresholds = Thresholds {
            confidence: config.confidence_threshold,
            iou: config.iou_threshold,
        };

        let mut model = self.model.lock();
        let start = Instant::now();
        let mut raw = model
            .infer(frame, thresholds)
            .map_err(|e| InferenceError::Model(format!("{e:#}")))?;
        let elapsed = start.elapsed();

        if let Some(limit) = self.timeout {
            if elapsed > limit {
                return Err(InferenceError::Timeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    limit_ms: limit.as_millis() as u64,
                });
            }
        }

        if let Some(tracker) = &self.tracker {
            tracker.lock().assign_ids(&mut raw);
        }

        let mut detections = Vec::with_capacity(raw.len());
        for r in raw {
            let class_name = model
                .class_name(r.class_id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("class_{}", r.class_id));
            detections.push(translate(r, class_name)?);
        }
        drop(model);

        trace!(frame = frame.index, count = detections.len(), ?elapsed, "inference");
        Ok((
            DetectionSet::new(frame.index, frame.timestamp, detections),
            elapsed,
        ))
    }
}

fn translate(raw: RawDetection, class_name: String) -> Result<Detection, InferenceError> {
    let bbox = BBox::from_array(raw.bbox);
    if !bbox.is_valid() {
        return Err(InferenceError::Malformed(format!("invalid bbox {:?}", raw.bbox)));
    }
    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(InferenceError::Malformed(format!(
            "confidence {} outside [0, 1]",
            raw.confidence
        )));
    }
    Ok(Detection {
        bbox,
        confidence: raw.confidence,
        class_id: raw.class_id,
        class_name,
        track_id: raw.track_id,
        interpolated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{self, ReplayModel};
    use image::RgbImage;

    fn raw(bbox: [f32; 4], class_id: u32, confidence: f32) -> RawDetection {
        RawDetection {
            bbox,
            class_id,
            confidence,
            track_id: None,
        }
    }

    fn adapter(frames: Vec<Vec<RawDetection>>) -> DetectionAdapter {
        DetectionAdapter::new(models::shared(Box::new(ReplayModel::scripted(frames))))
    }

    #[test]
    fn test_translates_class_names() {
        let adapter = adapter(vec![vec![
            raw([0.0, 0.0, 5.0, 5.0], 2, 0.7),
            raw([0.0, 0.0, 5.0, 5.0], 500, 0.7),
        ]]);
        let frame = Frame::new(0, RgbImage::new(10, 10));
        let set = adapter.infer(&frame, &PipelineConfig::default()).unwrap();
        assert_eq!(set.frame_index, 0);
        assert_eq!(set.detections[0].class_name, "car");
        assert_eq!(set.detections[1].class_name, "class_500");
        assert_eq!(set.detections[0].track_id, None);
    }

    #[test]
    fn test_malformed_output() {
        let frame = Frame::new(0, RgbImage::new(10, 10));
        let inverted = adapter(vec![vec![raw([5.0, 0.0, 1.0, 5.0], 0, 0.7)]]);
        assert!(matches!(
            inverted.infer(&frame, &PipelineConfig::default()),
            Err(InferenceError::Malformed(_))
        ));

        let overconfident = adapter(vec![vec![raw([0.0, 0.0, 1.0, 1.0], 0, 1.7)]]);
        assert!(matches!(
            overconfident.infer(&frame, &PipelineConfig::default()),
            Err(InferenceError::Malformed(_))
        ));
    }

    #[test]
    fn test_model_error_and_empty_frame() {
        let model = ReplayModel::scripted(vec![]).with_failure(0);
        let adapter = DetectionAdapter::new(models::shared(Box::new(model)));
        let frame = Frame::new(0, RgbImage::new(10, 10));
        assert!(matches!(
            adapter.infer(&frame, &PipelineConfig::default()),
            Err(InferenceError::Model(_))
        ));

        let empty = Frame::new(1, RgbImage::new(0, 0));
        assert!(matches!(
            adapter.infer(&empty, &PipelineConfig::default()),
            Err(InferenceError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_timeout() {
        let model = ReplayModel::scripted(vec![vec![]]).with_delay(Duration::from_millis(30));
        let adapter = DetectionAdapter::new(models::shared(Box::new(model)))
            .with_timeout(Some(Duration::from_millis(1)));
        let frame = Frame::new(0, RgbImage::new(10, 10));
        assert!(matches!(
            adapter.infer(&frame, &PipelineConfig::default()),
            Err(InferenceError::Timeout { .. })
        ));
    }

    #[test]
    fn test_lock_wait_not_counted() {
        let adapter = adapter(vec![vec![]]).with_timeout(Some(Duration::from_millis(50)));
        let model = Arc::clone(adapter.model());
        let (locked_tx, locked_rx) = crossbeam_channel::bounded(0);
        let holder = std::thread::spawn(move || {
            let _guard = model.lock();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(200));
        });
        locked_rx.recv().unwrap();

        let frame = Frame::new(0, RgbImage::new(10, 10));
        let (set, elapsed) = adapter
            .infer_timed(&frame, &PipelineConfig::default())
            .unwrap();
        assert!(set.detections.is_empty());
        assert!(elapsed < Duration::from_millis(50));
        holder.join().unwrap();
    }

    #[test]
    fn test_forks_track_independently() {
        let frames = (0..4).map(|_| vec![raw([0.0, 0.0, 20.0, 20.0], 0, 0.9)]).collect();
        let main = adapter(frames).with_tracking(true);
        let other = main.fork();
        let config = PipelineConfig::default();
        let track_id = |a: &DetectionAdapter, index: u64| {
            let frame = Frame::new(index, RgbImage::new(32, 32));
            a.infer(&frame, &config).unwrap().detections[0].track_id
        };

        assert_eq!(track_id(&main, 0), Some(1));
        assert_eq!(track_id(&other, 0), Some(1));

        other.reset_tracks();
        assert_eq!(track_id(&main, 1), Some(1));
        assert_eq!(track_id(&other, 1), Some(2));
        assert!(main.info().tracking);
        assert!(!adapter(vec![]).info().tracking);
    }
}
