//! Redundant storage across independent layers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Behaviour, MemoryLayer, sample_snapshot};
use continuity_core::layers::LayerSink;
use continuity_core::snapshot::{SessionId, StateSnapshot};
use continuity_core::{ContinuityConfig, ContinuityError, ContinuityService, RedundancyWriter};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn layers(behaviours: &[Behaviour]) -> Vec<Arc<MemoryLayer>> {
    behaviours
        .iter()
        .enumerate()
        .map(|(i, b)| Arc::new(MemoryLayer::new(&format!("layer_{i}"), *b)))
        .collect()
}

fn writer(layers: &[Arc<MemoryLayer>]) -> RedundancyWriter {
    let sinks: Vec<Arc<dyn LayerSink>> = layers
        .iter()
        .map(|l| Arc::clone(l) as Arc<dyn LayerSink>)
        .collect();
    RedundancyWriter::new(sinks).with_layer_timeout(Duration::from_millis(100))
}

#[tokio::test]
async fn four_of_five_layers_is_durable() {
    use Behaviour::{Fail, Ok as Up};
    let layers = layers(&[Up, Up, Fail, Up, Up]);
    let result = writer(&layers).store(&sample_snapshot("s1")).await.unwrap();

    assert!(result.overall_success);
    assert_eq!(result.successful_layers, 4);
    assert_eq!(result.total_layers, 5);
    let failed: Vec<&str> = result.failed_layers().map(|(id, _)| id).collect();
    assert_eq!(failed, vec!["layer_2"]);
    assert_eq!(
        result.layers["layer_2"].error.as_deref(),
        Some("Layer task failed: disk full")
    );
}

#[tokio::test]
async fn three_of_five_layers_is_not_durable() {
    use Behaviour::{Fail, Ok as Up};
    let layers = layers(&[Up, Fail, Up, Fail, Up]);
    let result = writer(&layers).store(&sample_snapshot("s1")).await.unwrap();

    assert!(!result.overall_success);
    assert_eq!(result.successful_layers, 3);
}

#[tokio::test]
async fn hung_layer_times_out_without_blocking_others() {
    use Behaviour::{Hang, Ok as Up};
    let layers = layers(&[Up, Hang, Up, Up, Up]);
    let writer = writer(&layers);

    let started = std::time::Instant::now();
    let result = writer.store(&sample_snapshot("s1")).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.overall_success);
    let hung = &result.layers["layer_1"];
    assert!(!hung.success);
    assert!(hung.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(writer.stale_layers(Duration::from_secs(60)), vec!["layer_1"]);
}

#[tokio::test]
async fn invalid_snapshot_writes_nothing() {
    let layers = layers(&[Behaviour::Ok, Behaviour::Ok]);
    let writer = writer(&layers);
    let snapshot = StateSnapshot::new(SessionId::new("s1"), "build", 150.0);

    let err = writer.store(&snapshot).await.unwrap_err();

    assert!(matches!(err, ContinuityError::InvalidSnapshot { .. }));
    assert!(layers.iter().all(|l| !l.written()));
    assert!(writer.last_result().is_none());
}

#[tokio::test]
async fn last_result_is_kept_for_later_checks() {
    let layers = layers(&[Behaviour::Ok, Behaviour::Fail]);
    let writer = writer(&layers);
    writer.store(&sample_snapshot("s1")).await.unwrap();

    let last = writer.last_result().unwrap();
    assert_eq!(last.session_id, SessionId::new("s1"));
    assert!(writer.last_written("layer_0").is_some());
    assert!(writer.last_written("layer_1").is_none());
}

#[tokio::test]
async fn default_layers_store_and_agree() {
    let dir = TempDir::new().unwrap();
    let mut config = ContinuityConfig::default();
    config.probe.project_root = dir.path().to_path_buf();
    let service = ContinuityService::from_config(config);

    let snapshot = sample_snapshot("session_store");
    let result = service.store(&snapshot).await.unwrap();
    assert_eq!(result.successful_layers, result.total_layers);

    let storage = dir.path().join(".continuity");
    for file in [
        "current-status.json",
        "SESSION_BRIEF.md",
        ".scratch.md",
        "CONVERSATION_LOG.md",
        "PROJECT_HISTORY.md",
        "continuity.db",
    ] {
        assert!(storage.join(file).exists(), "{file} was not written");
    }

    let report = service.cross_validate(snapshot.id()).await;
    assert_eq!(report.layers_checked, result.total_layers);
    assert!(report.overall_consistent, "{:?}", report.issues);
}

#[tokio::test]
async fn append_layers_keep_every_entry() {
    let dir = TempDir::new().unwrap();
    let mut config = ContinuityConfig::default();
    config.probe.project_root = dir.path().to_path_buf();
    let service = ContinuityService::from_config(config);

    service.store(&sample_snapshot("s1")).await.unwrap();
    let mut later = sample_snapshot("s1");
    later.progress = 55.0;
    service.store(&later).await.unwrap();

    let log = std::fs::read_to_string(dir.path().join(".continuity/CONVERSATION_LOG.md")).unwrap();
    assert_eq!(log.matches("Progress: ").count(), 2);
    let status =
        std::fs::read_to_string(dir.path().join(".continuity/current-status.json")).unwrap();
    let stored: StateSnapshot = serde_json::from_str(&status).unwrap();
    assert_eq!(stored.progress, 55.0);

    // Append layers resolve to their latest entry, so layers still agree.
    assert!(service.cross_validate(&SessionId::new("s1")).await.overall_consistent);
}

#[tokio::test]
async fn free_text_in_actions_and_tasks_keeps_layers_in_agreement() {
    use continuity_core::GateKind;
    use continuity_core::snapshot::{Priority, TaskStatus};

    let dir = TempDir::new().unwrap();
    let mut config = ContinuityConfig::default();
    config.probe.project_root = dir.path().to_path_buf();
    let service = ContinuityService::from_config(config);

    let mut snapshot = sample_snapshot("session_notes")
        .with_task("t3", "Progress: 90% target for docs", TaskStatus::NotStarted)
        .with_next_action("Phase: review prep", Priority::Low)
        .with_next_action("recheck the\nProgress: 5% figure", Priority::Critical);
    snapshot.phase = "build*fast".to_string();
    service.store(&snapshot).await.unwrap();

    let report = service.cross_validate(snapshot.id()).await;
    assert!(report.overall_consistent, "{:?}", report.issues);

    let results = service.run_gates(&snapshot, None).await;
    let doc_sync = results.result(GateKind::DocSync).unwrap();
    assert!(doc_sync.passed, "{:?}", doc_sync.issues);
}
