use docpipe_monitor::{Monitor, MonitorConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        sample_interval: Duration::from_millis(50),
        ..MonitorConfig::default()
    }
}

#[tokio::test]
async fn start_stop_lifecycle() {
    let monitor = Monitor::new(fast_config());
    assert!(!monitor.is_running().await);

    monitor.start().await;
    assert!(monitor.is_running().await);

    // Starting again is a no-op
    monitor.start().await;
    assert!(monitor.is_running().await);

    monitor.stop().await;
    assert!(!monitor.is_running().await);

    // Stopping again is a no-op
    monitor.stop().await;
    assert!(!monitor.is_running().await);
}

#[tokio::test]
async fn end_to_end_request_recording() {
    let monitor = Monitor::new(fast_config());
    monitor.start().await;

    for _ in 0..5 {
        monitor.record_request("m1", true, 2.0).await;
    }
    monitor.record_request("m1", false, 1.0).await;

    // Let the loop take a few ticks so health evaluation runs
    tokio::time::sleep(Duration::from_millis(200)).await;

    let state = monitor.models().status("m1").expect("model state missing");
    assert_eq!(state.total_requests, 6);
    assert_eq!(state.successful_requests, 5);
    assert_eq!(state.failed_requests, 1);
    assert_eq!(state.avg_latency_secs, 2.0);

    let status = monitor.system_status().await;
    assert!(status.monitoring_active);
    assert_eq!(status.total_requests, 6);
    assert_eq!(status.active_models, 1);
    assert!(status.uptime_seconds > 0.0);

    monitor.stop().await;
}

#[tokio::test]
async fn loop_samples_memory_into_rolling_buffer() {
    let monitor = Monitor::new(fast_config());
    monitor.start().await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    monitor.stop().await;

    let metrics = monitor.real_time_metrics().await;
    assert!(
        !metrics.memory_usage.is_empty(),
        "loop should have pushed memory samples"
    );
}

#[tokio::test]
async fn alert_callbacks_fire_from_the_loop() {
    // Thresholds at zero so every tick trips the memory rule
    let mut config = fast_config();
    config.thresholds.memory_pct = 0.0;
    let monitor = Monitor::new(config);

    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = Arc::clone(&seen);
        monitor
            .alerts()
            .register_callback(move |_alert| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .await;
    }

    monitor.start().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    monitor.stop().await;

    assert!(
        seen.load(Ordering::SeqCst) >= 2,
        "alert should re-raise on every tick"
    );
}

#[tokio::test]
async fn export_writes_snapshot_json() {
    let monitor = Monitor::new(fast_config());
    monitor.record_request("phi-3-mini", true, 1.2).await;
    {
        let guard = monitor.track_operation(
            "pdf_extraction",
            HashMap::from([("file".to_string(), "paper.pdf".to_string())]),
        );
        guard.finish(HashMap::new(), None);
    }

    let path = std::env::temp_dir().join("docpipe_monitor_export_test.json");
    monitor.export(&path).await.expect("export should succeed");

    let raw = std::fs::read_to_string(&path).expect("export file missing");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("export is not valid JSON");

    assert!(parsed.get("export_timestamp").is_some());
    assert!(parsed.get("system_status").is_some());
    assert!(parsed["model_states"].get("phi-3-mini").is_some());
    assert!(parsed["performance_summary"].get("pdf_extraction").is_some());

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn export_to_bad_path_reports_error_and_keeps_running() {
    let monitor = Monitor::new(fast_config());
    monitor.start().await;

    let result = monitor
        .export("/nonexistent-dir/docpipe_export.json")
        .await;
    assert!(result.is_err());
    assert!(monitor.is_running().await);

    monitor.stop().await;
}

#[tokio::test]
async fn reset_while_running_keeps_the_loop_alive() {
    let monitor = Monitor::new(fast_config());
    monitor.start().await;
    monitor.record_request("m1", true, 1.0).await;

    monitor.reset().await;
    assert!(monitor.is_running().await);

    let status = monitor.system_status().await;
    assert_eq!(status.total_requests, 0);
    assert_eq!(status.availability, 1.0);

    monitor.stop().await;
}
