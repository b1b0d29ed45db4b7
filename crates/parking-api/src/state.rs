//! Application state management

use crate::config::ApiConfig;
use parking_core::LotEventPayload;
use parking_cv::{Detector, FrameSource};
use parking_db::{FsImageStore, ImageStore, LotRepository};
use parking_monitor::MonitorSupervisor;
use parking_telemetry::MetricsCollector;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub config: Arc<ApiConfig>,
    /// Lot registry and monitoring tasks
    pub supervisor: Arc<MonitorSupervisor>,
    /// Prometheus metrics
    pub metrics: Arc<MetricsCollector>,
    /// Process start time
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create application state with all components
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let store = parking_db::connect_store(&config.db).await?;
        let repo = LotRepository::new(store);

        let images: Arc<dyn ImageStore> = Arc::new(FsImageStore::new(&config.images_dir).await?);
        info!(dir = %config.images_dir.display(), "Snapshot directory ready");

        let (frames, detector) = vision_backend(&config)?;
        let supervisor = MonitorSupervisor::new(config.monitor_config(), repo, images, frames, detector)?;

        Ok(Self::from_parts(config, Arc::new(supervisor), Arc::new(MetricsCollector::new()?)))
    }

    pub fn from_parts(
        config: ApiConfig,
        supervisor: Arc<MonitorSupervisor>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            supervisor,
            metrics,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Probe the registry store and publish the result as a gauge
    pub async fn check_store(&self) -> bool {
        let up = self
            .supervisor
            .repository()
            .store()
            .health_check()
            .await
            .unwrap_or(false);
        self.metrics.set_store_up(up);
        up
    }

    /// Forward supervisor events into the metrics collector
    pub fn spawn_metrics_listener(&self) -> JoinHandle<()> {
        let mut events = self.supervisor.subscribe();
        let supervisor = self.supervisor.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        metrics.observe_event(&event);
                        match event.payload {
                            LotEventPayload::CycleCompleted { .. } | LotEventPayload::CycleFailed { .. } => {
                                let stats = supervisor.stats();
                                metrics.record_cycle_duration(stats.last_cycle_ms / 1000.0);
                            }
                            _ => {}
                        }
                        metrics.set_lots_monitored(supervisor.task_count() as i64);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Metrics listener lagged behind lot events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Metrics listener stopped");
        })
    }
}

/// Real capture and YOLO inference
#[cfg(feature = "opencv")]
fn vision_backend(config: &ApiConfig) -> anyhow::Result<(Arc<dyn FrameSource>, Arc<dyn Detector>)> {
    use parking_cv::{OpenCvSource, YoloDetector};

    let detector = YoloDetector::from_config(&config.cv)?;
    info!(model = %config.cv.detection.model_path, "YOLO detector loaded");
    Ok((Arc::new(OpenCvSource), Arc::new(detector)))
}

/// Scripted streams without detections, for running the server without OpenCV
#[cfg(not(feature = "opencv"))]
fn vision_backend(config: &ApiConfig) -> anyhow::Result<(Arc<dyn FrameSource>, Arc<dyn Detector>)> {
    use parking_cv::{ScriptedSource, StaticDetector};

    let source = ScriptedSource::new();
    for address in &config.demo_streams {
        source.add_stream(address.clone());
    }
    warn!(
        streams = config.demo_streams.len(),
        "Built without `opencv`, using the demo stream backend"
    );
    Ok((Arc::new(source), Arc::new(StaticDetector::default())))
}
