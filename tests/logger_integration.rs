//! End-to-end tests for the logger with real files.

use layerlog::config::{
    DestinationSpec, EnvOverrides, LayerConfig, LoggerConfig, OutputFormat, CENTRALIZED_LAYER,
};
use layerlog::rotation::{backup_path, existing_backups};
use layerlog::telemetry::{ErrorTracker, ErrorTrackerConfig, PerformanceMonitor};
use layerlog::{LogError, LogLevel, Logger};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn quiet_tracker() -> Arc<ErrorTracker> {
    ErrorTracker::new(
        ErrorTrackerConfig::default()
            .with_panic_capture(false)
            .with_backtrace(false),
    )
}

fn build(config: LoggerConfig) -> Logger {
    Logger::builder(config)
        .with_performance_monitor(Arc::new(PerformanceMonitor::new()))
        .with_error_tracker(quiet_tracker())
        .with_env_overrides(EnvOverrides::default())
        .build()
        .unwrap()
}

fn json_file(path: &Path) -> DestinationSpec {
    DestinationSpec::file(path).with_format(OutputFormat::Json)
}

fn messages(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| {
            let value: Value = serde_json::from_str(line).unwrap();
            value["message"].as_str().unwrap().to_string()
        })
        .collect()
}

/// Every file in the rotation set, oldest first
fn rotation_set(path: &Path) -> Vec<PathBuf> {
    let mut files = existing_backups(path);
    files.reverse();
    files.push(path.to_path_buf());
    files
}

#[test]
fn test_round_trip_through_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.log");
    let logger = build(LoggerConfig::new().with_layer(
        "app",
        LayerConfig::new().with_destination(json_file(&path)),
    ));

    logger.info("first", "app");
    logger.warning("second", "app");
    logger.close();

    let lines: Vec<Value> = fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["message"], "first");
    assert_eq!(lines[0]["level"], "INFO");
    assert_eq!(lines[1]["message"], "second");
    assert_eq!(lines[1]["layer"], "app");
}

#[test]
fn test_buffer_thresholds() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.log");
    let logger = build(LoggerConfig::new().with_layer(
        "app",
        LayerConfig::new().with_destination(json_file(&path).with_buffering("1KB", 60_000)),
    ));

    logger.info("small", "app");
    assert_eq!(fs::read_to_string(&path).unwrap(), "");

    logger.flush();
    assert_eq!(messages(&path), vec!["small"]);

    let big = "x".repeat(2048);
    logger.info(&big, "app");
    assert_eq!(messages(&path).len(), 2);
    logger.close();
}

#[test]
fn test_rotation_preserves_every_line_once() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.log");
    let logger = build(LoggerConfig::new().with_layer(
        "app",
        LayerConfig::new().with_destination(
            json_file(&path)
                .with_rotation("2KB", 100)
                .with_buffering("512B", 60_000),
        ),
    ));

    let expected: Vec<String> = (0..300).map(|i| format!("message-{i:05}")).collect();
    for message in &expected {
        logger.info(message, "app");
    }
    logger.close();

    let files = rotation_set(&path);
    assert!(files.len() > 2, "expected rotations, got {} files", files.len());

    let mut seen = Vec::new();
    for file in &files {
        assert!(fs::metadata(file).unwrap().len() <= 2048, "{} too large", file.display());
        seen.extend(messages(file));
    }
    assert_eq!(seen, expected);

    let snapshot = logger.performance_metrics();
    let metrics = &snapshot.handler_metrics["app[0]:file"];
    assert_eq!(metrics["rotations"], files.len() as u64 - 1);
    assert_eq!(metrics["dropped_lines"], 0);
}

#[test]
fn test_backups_bounded_by_count() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.log");
    let logger = build(LoggerConfig::new().with_layer(
        "app",
        LayerConfig::new().with_destination(
            json_file(&path)
                .with_rotation("1KB", 3)
                .with_buffering("0B", 60_000),
        ),
    ));

    for i in 0..200 {
        logger.info(&format!("line {i}"), "app");
    }
    logger.close();

    assert_eq!(existing_backups(&path).len(), 3);
    assert!(!backup_path(&path, 4).exists());

    // The newest lines survive in the live file and the first backup
    let live = messages(&path);
    assert_eq!(live.last().map(String::as_str), Some("line 199"));
}

#[test]
fn test_concurrent_writers_lose_nothing() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 250;

    let dir = tempdir().unwrap();
    let path = dir.path().join("app.log");
    let logger = Arc::new(build(LoggerConfig::new().with_layer(
        "app",
        LayerConfig::new().with_destination(json_file(&path).with_buffering("4KB", 60_000)),
    )));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let logger = Arc::clone(&logger);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    logger.info(&format!("t{t}-{i}"), "app");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    logger.close();

    let lines = messages(&path);
    assert_eq!(lines.len(), THREADS * PER_THREAD);
    let unique: HashSet<&String> = lines.iter().collect();
    assert_eq!(unique.len(), THREADS * PER_THREAD);

    // Per-thread order is preserved
    for t in 0..THREADS {
        let prefix = format!("t{t}-");
        let order: Vec<usize> = lines
            .iter()
            .filter_map(|m| m.strip_prefix(&prefix))
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(order, (0..PER_THREAD).collect::<Vec<_>>());
    }
}

#[test]
fn test_reserved_layer_names() {
    let result = Logger::builder(
        LoggerConfig::new().with_layer("__AUDIT__", LayerConfig::new().with_destination(DestinationSpec::console())),
    )
    .with_error_tracker(quiet_tracker())
    .build();
    assert!(matches!(result, Err(LogError::Configuration(_))));

    let dir = tempdir().unwrap();
    let path = dir.path().join("central.log");
    let logger = build(LoggerConfig::new().with_layer(
        CENTRALIZED_LAYER,
        LayerConfig::new().with_destination(json_file(&path)),
    ));
    logger.error("routed centrally", "payments");
    logger.close();
    assert_eq!(messages(&path), vec!["routed centrally"]);
}

#[test]
fn test_unwritable_file_falls_back_and_is_tracked() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "a file, not a directory").unwrap();

    let logger = build(LoggerConfig::new().with_layer(
        "app",
        LayerConfig::new().with_destination(DestinationSpec::file(blocker.join("app.log"))),
    ));

    let layer = logger.router().resolve("app");
    assert_eq!(layer.sinks().len(), 1);
    assert_eq!(layer.sinks()[0].name(), "app[0]:console");
    assert_eq!(logger.error_stats().by_category["handler-creation"], 1);
}

#[cfg(target_os = "linux")]
#[test]
fn test_write_failures_tracked_not_raised() {
    let logger = build(LoggerConfig::new().with_layer(
        "app",
        LayerConfig::new().with_destination(DestinationSpec::file("/dev/full").with_buffering("0B", 60_000)),
    ));

    logger.info("cannot be stored", "app");
    logger.info("nor this", "app");

    let stats = logger.error_stats();
    assert!(stats.by_category["file-io"] >= 2);
    assert!(stats.total_errors >= 2);

    let snapshot = logger.performance_metrics();
    let metrics = &snapshot.handler_metrics["app[0]:file"];
    assert_eq!(metrics["bytes_written"], 0);
    assert_eq!(metrics["dropped_lines"], 2);
}

#[test]
fn test_multiline_messages_stay_on_one_line() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.log");
    let logger = build(LoggerConfig::new().with_layer(
        "app",
        LayerConfig::new().with_destination(DestinationSpec::file(&path)),
    ));

    logger.info("first\nINFO [app] forged", "app");
    logger.info("second", "app");
    logger.close();

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("first\\nINFO [app] forged"));
    assert!(lines[1].ends_with("second"));
}

#[test]
fn test_logger_from_config_file() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("db.log");
    let config_path = dir.path().join("logging.toml");
    fs::write(
        &config_path,
        format!(
            r#"
            default_level = "DEBUG"
            lazy_layers = true

            [layers.db]
            level = "INFO"

            [[layers.db.destinations]]
            type = "file"
            format = "json"
            path = "{}"
            buffer_size = "0B"
            "#,
            log_path.display()
        ),
    )
    .unwrap();

    let logger = Logger::from_file(&config_path).unwrap();
    logger.debug("filtered", "db");
    logger.log_named("error", "stored", "db").unwrap();
    logger.close();

    assert_eq!(messages(&log_path), vec!["stored"]);
}

#[test]
fn test_levels_below_floor_never_reach_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.log");
    let logger = build(LoggerConfig::new().with_layer(
        "app",
        LayerConfig::new()
            .with_level(LogLevel::Warning)
            .with_destination(json_file(&path)),
    ));

    for level in LogLevel::ALL {
        logger.log(level, level.as_str(), "app");
    }
    logger.close();
    assert_eq!(messages(&path), vec!["WARNING", "ERROR", "CRITICAL"]);
}
