//! 推流中心 (Stream Hub)
//!
//! 同一视频源只跑一条管线, 渲染帧经 broadcast channel 共享给所有观看者.
//! 第一个观看者到来时启动管线; 最后一个离开后, 管线在下一次迭代末尾退出.
//! 服务关闭时 [`StreamHub::shutdown`] 让所有管线退出并等待资源释放.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::ConfigHandle;
use crate::detection::DetectionAdapter;
use crate::detection::Frame;
use crate::error::{FrameReadError, SourceOpenError};
use crate::input::{open_source, FrameSource};
use crate::pipeline::{Command, CommandSource, Pipeline};
use crate::renderer::HudRenderer;
use crate::sinks::StreamSink;

/// 帧源工厂, 默认按配置的源描述打开
pub type SourceFactory =
    Arc<dyn Fn() -> Result<Box<dyn FrameSource>, SourceOpenError> + Send + Sync>;

#[derive(Default)]
struct Broadcast {
    tx: Option<broadcast::Sender<Bytes>>,
    generation: u64,
    closing: bool,
    workers: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct StreamHub {
    factory: SourceFactory,
    adapter: DetectionAdapter,
    config: ConfigHandle,
    renderer: HudRenderer,
    capacity: usize,
    quality: u8,
    current: Arc<Mutex<Broadcast>>,
}

impl StreamHub {
    pub fn new(
        source: String,
        adapter: DetectionAdapter,
        config: ConfigHandle,
        renderer: HudRenderer,
    ) -> Self {
        let factory: SourceFactory = Arc::new(move || open_source(&source));
        Self {
            factory,
            adapter,
            config,
            renderer,
            capacity: 4,
            quality: 80,
            current: Arc::new(Mutex::new(Broadcast::default())),
        }
    }

    /// 替换帧源工厂 (测试或嵌入时使用)
    pub fn with_factory(mut self, factory: SourceFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// 当前是否有管线在运行
    pub fn is_live(&self) -> bool {
        self.current.lock().tx.is_some()
    }

    /// 订阅推流; 没有运行中的管线时启动一条
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Bytes>, SourceOpenError> {
        if let Some(rx) = self.join_live()? {
            return Ok(rx);
        }

        // 构造帧源不持锁
        let source = (self.factory)()?;

        let mut current = self.current.lock();
        if current.closing {
            return Err(SourceOpenError::ShuttingDown);
        }
        if let Some(tx) = &current.tx {
            // 另一个请求抢先启动了管线
            return Ok(tx.subscribe());
        }
        current.workers.retain(|w| !w.is_finished());

        let (tx, rx) = broadcast::channel(self.capacity);
        current.generation += 1;
        let generation = current.generation;
        current.tx = Some(tx.clone());

        let source = HubSource {
            inner: source,
            hub: Arc::clone(&self.current),
            generation,
        };
        let pipeline = Pipeline::new(
            Box::new(source),
            self.adapter.fork(),
            self.config.clone(),
            self.renderer.clone(),
        )
        .with_sink(Box::new(StreamSink::new(tx.clone(), self.quality)))
        .with_commands(Box::new(ViewerWatch {
            tx,
            hub: Arc::clone(&self.current),
            generation,
        }));

        let hub = Arc::clone(&self.current);
        let spawned = thread::Builder::new()
            .name(format!("stream-{generation}"))
            .spawn(move || {
                info!("📡 推流管线 #{} 启动", generation);
                match pipeline.run() {
                    Ok(summary) => info!(
                        "📡 推流管线 #{} 结束 ({} 帧)",
                        generation, summary.frames_processed
                    ),
                    Err(e) => warn!("⚠️  推流管线 #{} 异常结束: {}", generation, e),
                }
                retire(&hub, generation);
            });
        match spawned {
            Ok(worker) => {
                current.workers.push(worker);
                Ok(rx)
            }
            Err(e) => {
                current.tx = None;
                Err(SourceOpenError::Io(e))
            }
        }
    }

    fn join_live(&self) -> Result<Option<broadcast::Receiver<Bytes>>, SourceOpenError> {
        let current = self.current.lock();
        if current.closing {
            return Err(SourceOpenError::ShuttingDown);
        }
        Ok(current.tx.as_ref().map(broadcast::Sender::subscribe))
    }

    /// 让所有推流管线退出并等待它们释放帧源; 之后的订阅被拒绝
    pub fn shutdown(&self) {
        let workers = {
            let mut current = self.current.lock();
            current.closing = true;
            current.tx = None;
            std::mem::take(&mut current.workers)
        };
        if !workers.is_empty() {
            info!("📡 等待 {} 条推流管线退出", workers.len());
        }
        for worker in workers {
            if worker.join().is_err() {
                warn!("⚠️  推流管线线程异常退出");
            }
        }
    }
}

fn retire(hub: &Mutex<Broadcast>, generation: u64) {
    let mut current = hub.lock();
    if current.generation == generation {
        current.tx = None;
    }
}

/// 读到流结束的同时摘下广播, 之后的观看者会启动新管线而不是订阅一个即将关闭的广播
struct HubSource {
    inner: Box<dyn FrameSource>,
    hub: Arc<Mutex<Broadcast>>,
    generation: u64,
}

impl FrameSource for HubSource {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn open(&mut self) -> Result<(), SourceOpenError> {
        self.inner.open()
    }

    fn read(&mut self) -> Result<Option<Frame>, FrameReadError> {
        let frame = self.inner.read();
        if matches!(frame, Ok(None)) {
            retire(&self.hub, self.generation);
        }
        frame
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// 观看者全部断开时发出退出命令
struct ViewerWatch {
    tx: broadcast::Sender<Bytes>,
    hub: Arc<Mutex<Broadcast>>,
    generation: u64,
}

impl CommandSource for ViewerWatch {
    fn poll(&mut self, wait: Duration) -> Option<Command> {
        // 与 subscribe 共用一把锁, 判定无人观看后新来的观看者会启动新管线
        let mut current = self.hub.lock();
        if current.closing {
            return Some(Command::Quit);
        }
        if self.tx.receiver_count() == 0 {
            if current.generation == self.generation {
                current.tx = None;
            }
            return Some(Command::Quit);
        }
        drop(current);
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        None
    }
}
