//! Layer resolution and dispatch
//!
//! A layer name resolves to the first configured layer in the chain
//! `requested -> DEFAULT -> __CENTRALIZED__`, and to a bare stderr sink when
//! none of those exist. Resolved layers are cached by name; in lazy mode a
//! layer's sinks are built on first use.

use crate::config::{LayerSpec, LogLevel, LoggerConfig, CENTRALIZED_LAYER, DEFAULT_LAYER};
use crate::error::{LogError, LogResult};
use crate::format::LogEntry;
use crate::sink::{Sink, SinkFactory};
use crate::telemetry::{ErrorCategory, ErrorReport, ErrorTracker};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Name of the layer returned when nothing in the fallback chain exists
pub const LAST_RESORT_LAYER: &str = "last-resort";

/// A layer with its sinks built
pub struct ResolvedLayer {
    /// Layer name
    name: String,

    /// Severity floor
    min_level: LogLevel,

    /// Sinks in destination order
    sinks: Vec<Arc<dyn Sink>>,

    /// Where sink failures go
    errors: Arc<ErrorTracker>,
}

impl fmt::Debug for ResolvedLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedLayer")
            .field("name", &self.name)
            .field("min_level", &self.min_level)
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl ResolvedLayer {
    /// Layer name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Severity floor
    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Sinks in destination order
    pub fn sinks(&self) -> &[Arc<dyn Sink>] {
        &self.sinks
    }

    /// Whether the layer has no sinks
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Whether `level` passes the layer floor
    pub fn accepts(&self, level: LogLevel) -> bool {
        level.should_log(self.min_level)
    }

    /// Hand the entry to every sink whose level admits it.
    ///
    /// A sink failure is tracked and does not stop the remaining sinks.
    pub fn dispatch(&self, entry: &LogEntry) {
        if !self.accepts(entry.level) {
            return;
        }
        for sink in &self.sinks {
            if !sink.should_log(entry.level) {
                continue;
            }
            if let Err(err) = sink.emit(entry) {
                let category = match &err {
                    LogError::Serialization(_) => ErrorCategory::Formatting,
                    _ => ErrorCategory::SinkWrite,
                };
                self.track(category, sink.as_ref(), &err);
            }
        }
    }

    /// Flush every sink
    pub fn flush(&self) {
        for sink in &self.sinks {
            if let Err(err) = sink.flush() {
                self.track(ErrorCategory::SinkWrite, sink.as_ref(), &err);
            }
        }
    }

    /// Close every sink
    pub fn close(&self) {
        for sink in &self.sinks {
            if let Err(err) = sink.close() {
                self.track(ErrorCategory::SinkWrite, sink.as_ref(), &err);
            }
        }
    }

    fn track(&self, category: ErrorCategory, sink: &dyn Sink, err: &LogError) {
        self.errors.track(
            ErrorReport::new(category, err)
                .component("LayerRouter")
                .context("layer", &self.name)
                .context("sink", sink.name()),
        );
    }
}

#[derive(Default)]
struct RouterState {
    specs: HashMap<String, LayerSpec>,
    cache: HashMap<String, Arc<ResolvedLayer>>,
    lazy: bool,
}

/// Maps layer names to resolved layers
pub struct LayerRouter {
    factory: SinkFactory,
    state: RwLock<RouterState>,
    last_resort: Arc<ResolvedLayer>,
}

impl fmt::Debug for LayerRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("LayerRouter")
            .field("layers", &state.specs.keys().collect::<Vec<_>>())
            .field("cached", &state.cache.keys().collect::<Vec<_>>())
            .field("lazy", &state.lazy)
            .finish_non_exhaustive()
    }
}

fn index_specs(config: &LoggerConfig) -> LogResult<HashMap<String, LayerSpec>> {
    Ok(config
        .layer_specs()?
        .into_iter()
        .map(|spec| (spec.name.clone(), spec))
        .collect())
}

fn build_layer(factory: &SinkFactory, spec: &LayerSpec) -> ResolvedLayer {
    let sinks: Vec<Arc<dyn Sink>> = spec
        .destinations
        .iter()
        .enumerate()
        .filter_map(|(index, destination)| factory.build(&spec.name, index, destination, spec.level))
        .collect();

    if sinks.is_empty() {
        warn!(layer = %spec.name, "layer has no usable sinks, its messages will be dropped");
    } else {
        debug!(layer = %spec.name, sinks = sinks.len(), "resolved layer");
    }

    ResolvedLayer {
        name: spec.name.clone(),
        min_level: spec.level,
        sinks,
        errors: Arc::clone(factory.errors()),
    }
}

fn build_all(factory: &SinkFactory, specs: &HashMap<String, LayerSpec>) -> HashMap<String, Arc<ResolvedLayer>> {
    specs
        .iter()
        .map(|(name, spec)| (name.clone(), Arc::new(build_layer(factory, spec))))
        .collect()
}

impl LayerRouter {
    /// Validate the configuration and, unless it asks for lazy layers,
    /// build every layer's sinks.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Configuration`] for a reserved or empty layer name.
    pub fn new(config: &LoggerConfig, factory: SinkFactory) -> LogResult<Self> {
        let specs = index_specs(config)?;
        let cache = if config.lazy_layers {
            HashMap::new()
        } else {
            build_all(&factory, &specs)
        };

        let last_resort = Arc::new(ResolvedLayer {
            name: LAST_RESORT_LAYER.to_string(),
            min_level: LogLevel::Debug,
            sinks: vec![factory.last_resort_sink()],
            errors: Arc::clone(factory.errors()),
        });

        Ok(Self {
            factory,
            state: RwLock::new(RouterState {
                specs,
                cache,
                lazy: config.lazy_layers,
            }),
            last_resort,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, RouterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RouterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The sink factory
    pub fn factory(&self) -> &SinkFactory {
        &self.factory
    }

    /// Resolve a layer name through the fallback chain
    pub fn resolve(&self, requested: &str) -> Arc<ResolvedLayer> {
        [requested, DEFAULT_LAYER, CENTRALIZED_LAYER]
            .into_iter()
            .find_map(|candidate| self.lookup(candidate))
            .unwrap_or_else(|| Arc::clone(&self.last_resort))
    }

    fn lookup(&self, name: &str) -> Option<Arc<ResolvedLayer>> {
        {
            let state = self.read();
            if let Some(layer) = state.cache.get(name) {
                return Some(Arc::clone(layer));
            }
            if !state.specs.contains_key(name) {
                return None;
            }
        }

        let mut state = self.write();
        // Another thread may have built it while we waited
        if let Some(layer) = state.cache.get(name) {
            return Some(Arc::clone(layer));
        }
        let spec = state.specs.get(name)?.clone();
        let layer = Arc::new(build_layer(&self.factory, &spec));
        state.cache.insert(name.to_string(), Arc::clone(&layer));
        Some(layer)
    }

    /// Configured layer names
    pub fn layer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().specs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every sink built so far
    pub fn sinks(&self) -> Vec<Arc<dyn Sink>> {
        self.read()
            .cache
            .values()
            .flat_map(|layer| layer.sinks().iter().cloned())
            .collect()
    }

    /// Replace the configuration.
    ///
    /// The new layers are built (unless lazy) before the swap; the old
    /// layers are closed after it. On error the current configuration stays.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Configuration`] for a reserved or empty layer name.
    pub fn reconfigure(&self, config: &LoggerConfig) -> LogResult<()> {
        let specs = index_specs(config)?;
        let cache = if config.lazy_layers {
            HashMap::new()
        } else {
            build_all(&self.factory, &specs)
        };

        let previous = std::mem::replace(
            &mut *self.write(),
            RouterState {
                specs,
                cache,
                lazy: config.lazy_layers,
            },
        );
        for layer in previous.cache.values() {
            layer.close();
        }
        Ok(())
    }

    /// Flush every built layer
    pub fn flush(&self) {
        let layers: Vec<Arc<ResolvedLayer>> = self.read().cache.values().cloned().collect();
        for layer in layers {
            layer.flush();
        }
        self.last_resort.flush();
    }

    /// Close every built layer and forget the configuration. Later
    /// resolutions return the last-resort layer.
    pub fn close(&self) {
        let previous = std::mem::take(&mut *self.write());
        for layer in previous.cache.values() {
            layer.close();
        }
        self.last_resort.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationKind, DestinationSpec, EnvOverrides, LayerConfig};
    use crate::format::JsonFormatter;
    use crate::sink::{MemorySink, SinkExtension, SinkRequest};
    use crate::telemetry::{ErrorTrackerConfig, PerformanceMonitor};
    use std::sync::Mutex;
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        created: Mutex<Vec<Arc<MemorySink>>>,
    }

    impl Recorder {
        fn sink(&self, index: usize) -> Arc<MemorySink> {
            Arc::clone(&self.created.lock().unwrap()[index])
        }

        fn count(&self) -> usize {
            self.created.lock().unwrap().len()
        }
    }

    impl SinkExtension for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn create(&self, request: &SinkRequest<'_>) -> LogResult<Option<Arc<dyn Sink>>> {
            let sink = Arc::new(MemorySink::new(
                request.sink_name("memory"),
                request.min_level,
                Box::new(JsonFormatter),
            ));
            self.created.lock().unwrap().push(Arc::clone(&sink));
            Ok(Some(sink))
        }
    }

    fn memory() -> DestinationSpec {
        DestinationSpec::new(DestinationKind::Extension("memory".into()))
    }

    fn build_router(config: &LoggerConfig) -> (LayerRouter, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let factory = SinkFactory::new(
            Arc::new(EnvOverrides::default()),
            Arc::new(PerformanceMonitor::new()),
            ErrorTracker::new(
                ErrorTrackerConfig::default()
                    .with_panic_capture(false)
                    .with_backtrace(false),
            ),
        )
        .with_extension(Arc::clone(&recorder) as Arc<dyn SinkExtension>);
        (LayerRouter::new(config, factory).unwrap(), recorder)
    }

    fn layer() -> LayerConfig {
        LayerConfig::new().with_destination(memory())
    }

    #[test]
    fn test_fallback_chain() {
        let config = LoggerConfig::new()
            .with_layer("api", layer())
            .with_layer(DEFAULT_LAYER, layer())
            .with_layer(CENTRALIZED_LAYER, layer());
        let (router, _) = build_router(&config);

        assert_eq!(router.resolve("api").name(), "api");
        assert_eq!(router.resolve("missing").name(), DEFAULT_LAYER);

        let config = LoggerConfig::new().with_layer(CENTRALIZED_LAYER, layer());
        let (router, _) = build_router(&config);
        assert_eq!(router.resolve("missing").name(), CENTRALIZED_LAYER);

        let (router, _) = build_router(&LoggerConfig::new());
        let fallback = router.resolve("missing");
        assert_eq!(fallback.name(), LAST_RESORT_LAYER);
        assert_eq!(fallback.sinks().len(), 1);
    }

    #[test]
    fn test_resolution_is_cached() {
        let config = LoggerConfig::new().with_layer("api", layer()).with_lazy_layers(true);
        let (router, recorder) = build_router(&config);

        let first = router.resolve("api");
        let second = router.resolve("api");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(recorder.count(), 1);
    }

    #[test]
    fn test_lazy_layers_build_on_first_use() {
        let config = LoggerConfig::new()
            .with_layer("api", layer())
            .with_layer("db", layer())
            .with_lazy_layers(true);
        let (router, recorder) = build_router(&config);

        assert!(router.sinks().is_empty());
        assert_eq!(recorder.count(), 0);

        router.resolve("db");
        assert_eq!(recorder.count(), 1);
        assert_eq!(router.sinks().len(), 1);
        assert_eq!(router.factory().perf().snapshot().handler_creations, 1);
    }

    #[test]
    fn test_eager_layers_build_up_front() {
        let config = LoggerConfig::new().with_layer("api", layer()).with_layer("db", layer());
        let (router, recorder) = build_router(&config);
        assert_eq!(recorder.count(), 2);
        assert_eq!(router.layer_names(), vec!["api".to_string(), "db".to_string()]);
    }

    #[test]
    fn test_reserved_name_rejected() {
        let config = LoggerConfig::new().with_layer("__SYSTEM__", layer());
        let factory = SinkFactory::new(
            Arc::new(EnvOverrides::default()),
            Arc::new(PerformanceMonitor::new()),
            ErrorTracker::new(ErrorTrackerConfig::default().with_panic_capture(false)),
        );
        let result = LayerRouter::new(&config, factory);
        assert!(matches!(result, Err(LogError::Configuration(_))));
    }

    #[test]
    fn test_layer_without_destinations() {
        let config = LoggerConfig::new().with_layer("quiet", LayerConfig::new());
        let (router, _) = build_router(&config);

        let quiet = router.resolve("quiet");
        assert_eq!(quiet.name(), "quiet");
        assert!(quiet.is_empty());
        quiet.dispatch(&LogEntry::new(LogLevel::Critical, "quiet", "dropped"));
    }

    #[test]
    fn test_dispatch_respects_floors() {
        let config = LoggerConfig::new().with_layer(
            "api",
            LayerConfig::new()
                .with_level(LogLevel::Warning)
                .with_destination(memory())
                .with_destination(memory().with_level(LogLevel::Error)),
        );
        let (router, recorder) = build_router(&config);
        let api = router.resolve("api");

        for level in LogLevel::ALL {
            api.dispatch(&LogEntry::new(level, "api", level.as_str()));
        }
        assert_eq!(recorder.sink(0).count(), 3);
        assert_eq!(recorder.sink(1).count(), 2);
    }

    #[test]
    fn test_sink_failure_is_tracked_and_isolated() {
        let config = LoggerConfig::new().with_layer(
            "api",
            LayerConfig::new().with_destination(memory()).with_destination(memory()),
        );
        let (router, recorder) = build_router(&config);
        recorder.sink(0).set_failing(true);

        router.resolve("api").dispatch(&LogEntry::new(LogLevel::Info, "api", "hello"));

        assert_eq!(recorder.sink(1).count(), 1);
        let stats = router.factory().errors().stats();
        assert_eq!(stats.by_category["sink-write"], 1);
    }

    #[test]
    fn test_reconfigure_swaps_layers() {
        let config = LoggerConfig::new().with_layer("api", layer());
        let (router, recorder) = build_router(&config);
        let old = recorder.sink(0);

        let next = LoggerConfig::new().with_layer("db", layer());
        router.reconfigure(&next).unwrap();

        assert!(old.is_closed());
        assert_eq!(router.layer_names(), vec!["db".to_string()]);
        assert_eq!(router.resolve("api").name(), LAST_RESORT_LAYER);

        let bad = LoggerConfig::new().with_layer("__BAD__", layer());
        assert!(router.reconfigure(&bad).is_err());
        assert_eq!(router.layer_names(), vec!["db".to_string()]);
    }

    #[test]
    fn test_close_closes_sinks() {
        let config = LoggerConfig::new().with_layer("api", layer());
        let (router, recorder) = build_router(&config);
        router.close();
        assert!(recorder.sink(0).is_closed());
        assert!(router.sinks().is_empty());
        assert_eq!(router.resolve("api").name(), LAST_RESORT_LAYER);
    }

    #[test]
    fn test_concurrent_lazy_resolution_builds_once() {
        let config = LoggerConfig::new().with_layer("api", layer()).with_lazy_layers(true);
        let (router, recorder) = build_router(&config);
        let router = Arc::new(router);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let router = Arc::clone(&router);
                thread::spawn(move || {
                    for _ in 0..50 {
                        assert_eq!(router.resolve("api").name(), "api");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(recorder.count(), 1);
    }
}
