// src/main.rs

use anyhow::{Context, Result};
use people_counter::config::{Config, DetectorBackend};
use people_counter::detection::{DetectorEngine, ReplayEngine, TimedEngine};
use people_counter::pipeline::{CaptureWorker, EventLog, FrameBuffer, PipelineDriver, ReportHandle};
use people_counter::source::ImageDirSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "PEOPLE_COUNTER_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},ort=warn", config.logging.level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚶 People Counter starting");
    info!("✓ Configuration loaded from {}", config_path);
    for line in &config.lines {
        info!(
            "  line '{}': ({:.0}, {:.0}) → ({:.0}, {:.0}), entering toward {:?}",
            line.name, line.start[0], line.start[1], line.end[0], line.end[1], line.positive_side
        );
    }

    let engine = build_engine(&config)?;
    let engine = TimedEngine::spawn(engine, Duration::from_millis(config.detector.timeout_ms));
    info!("✓ Detector ready: {}", engine.name());

    let source = ImageDirSource::open(&config.source.path, config.source.fps, config.source.realtime)?;
    info!("✓ Frame source: {} frame(s) in {}", source.len(), config.source.path);

    let report = ReportHandle::new(config.reporting.subscriber_capacity);
    let stop = Arc::new(AtomicBool::new(false));
    let mut driver = PipelineDriver::new(&config, engine, report.clone()).with_stop_flag(Arc::clone(&stop));
    if let Some(path) = &config.reporting.event_log_path {
        driver = driver.with_event_log(EventLog::open(path)?);
    }

    let capture = CaptureWorker::spawn(
        source,
        FrameBuffer::new(config.source.buffer_depth),
        Arc::clone(&stop),
        Duration::from_millis(config.source.retry_ms),
    );
    let pull_timeout = Duration::from_millis(config.source.pull_timeout_ms);

    let ctrl_c_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing current frame");
            ctrl_c_stop.store(true, Ordering::Relaxed);
        }
    });

    let result = tokio::task::spawn_blocking(move || driver.run(capture, pull_timeout))
        .await
        .context("pipeline thread panicked")?;

    match result {
        Ok(summary) => {
            info!(
                "✅ Done: in={} out={} net={} occupancy={} ({} frames, {} dropped)",
                summary.counts.entries,
                summary.counts.exits,
                summary.counts.net,
                summary.counts.occupancy,
                summary.metrics.frames_processed,
                summary.frames_dropped
            );
            for line in &summary.counts.per_line {
                info!("  {}: in={} out={}", line.name, line.entries, line.exits);
            }
            info!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(e) => {
            let last = report.snapshot();
            error!(
                "Pipeline halted: {} (last counts: in={} out={} net={})",
                e, last.entries, last.exits, last.net
            );
            Err(e.into())
        }
    }
}

fn build_engine(config: &Config) -> Result<Box<dyn DetectorEngine>> {
    match config.detector.backend {
        DetectorBackend::Replay => {
            let engine = ReplayEngine::load(&config.detector.replay_path)?;
            info!(
                "Replaying detections for {} frame(s) from {}",
                engine.frame_count(),
                config.detector.replay_path
            );
            Ok(Box::new(engine))
        }
        DetectorBackend::Onnx => build_onnx(config),
    }
}

#[cfg(feature = "onnx")]
fn build_onnx(config: &Config) -> Result<Box<dyn DetectorEngine>> {
    let engine = people_counter::detection::OnnxEngine::new(
        &config.detector.model_path,
        config.detector.input_size as u32,
    )?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "onnx"))]
fn build_onnx(_config: &Config) -> Result<Box<dyn DetectorEngine>> {
    anyhow::bail!("detector.backend is 'onnx' but this build lacks the 'onnx' feature")
}
