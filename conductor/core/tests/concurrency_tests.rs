//! Concurrency Tests
//!
//! Many threads drive the registry, cache and monitor at once. These verify
//! that counters stay consistent, load returns to zero and the cache never
//! outgrows its capacity under contention.
//!
//! # Running
//!
//! ```bash
//! cargo test --test concurrency_tests -- --nocapture
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use model_conductor::config::{CacheConfig, MonitorConfig};
use model_conductor::routing::strategies::{
    COST_OPTIMIZED, LEAST_CONNECTIONS, PERFORMANCE_BASED, RANDOM, ROUND_ROBIN,
    WEIGHTED_ROUND_ROBIN,
};
use model_conductor::{
    HealthStatus, Modality, Model, ModelMonitor, ModelProvider, ModelRegistry, ProviderError,
    ResponseCache, SelectionRequirements, TextRequest, TextResponse, TokenUsage,
};

// =============================================================================
// Infrastructure
// =============================================================================

/// Scenario sizing
#[derive(Clone, Copy, Debug)]
struct Load {
    threads: usize,
    requests_per_thread: usize,
}

impl Default for Load {
    fn default() -> Self {
        Self {
            threads: 8,
            requests_per_thread: 200,
        }
    }
}

/// Provider that fails every `fail_every`-th call
struct CountingProvider {
    calls: AtomicU64,
    fail_every: u64,
}

impl CountingProvider {
    fn new(fail_every: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            fail_every,
        })
    }
}

impl ModelProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    fn supported_models(&self) -> Vec<String> {
        Vec::new()
    }

    fn generate_text(&self, request: &TextRequest) -> Result<TextResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(ProviderError::Timeout);
        }
        Ok(TextResponse::new(
            request.prompt.clone(),
            TokenUsage {
                input_tokens: 10,
                output_tokens: 10,
            },
        ))
    }
}

fn registry(capacity: usize, fail_every: u64) -> (Arc<ModelRegistry>, Arc<CountingProvider>) {
    let cache = Arc::new(ResponseCache::new(&CacheConfig {
        capacity,
        ..CacheConfig::default()
    }));
    let (monitor, _alerts) = ModelMonitor::new(MonitorConfig::default());
    let registry = ModelRegistry::new(cache, Arc::new(monitor));
    let provider = CountingProvider::new(fail_every);
    registry.bind_provider(provider.clone());
    for id in ["a", "b", "c"] {
        registry.register(Model::new(id, "counting", Modality::Text));
    }
    (Arc::new(registry), provider)
}

/// Run `work(thread_index, request_index)` on every thread, released together
fn hammer<F>(load: Load, work: F)
where
    F: Fn(usize, usize) + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let barrier = Arc::new(Barrier::new(load.threads));
    let handles: Vec<_> = (0..load.threads)
        .map(|t| {
            let work = Arc::clone(&work);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..load.requests_per_thread {
                    work(t, i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn concurrent_generation_counters_match_provider_calls() {
    let load = Load::default();
    let (registry, provider) = registry(10_000, 7);

    let shared = Arc::clone(&registry);
    hammer(load, move |t, i| {
        // Unique prompts so every request reaches the provider
        let _ = shared.generate_text(TextRequest::new("", format!("t{t}-r{i}")));
    });

    let total = (load.threads * load.requests_per_thread) as u64;
    assert_eq!(provider.calls.load(Ordering::SeqCst), total);

    let all = registry.monitor().snapshot_all();
    let requests: u64 = all.values().map(|m| m.request_count).sum();
    let errors: u64 = all.values().map(|m| m.error_count).sum();
    assert_eq!(requests, total);
    assert_eq!(errors, total / 7);
    for metrics in all.values() {
        assert_eq!(metrics.current_load, 0, "load leaked for {}", metrics.model_id);
        assert_eq!(
            metrics.success_count + metrics.error_count,
            metrics.request_count
        );
    }
}

#[test]
fn concurrent_identical_requests_share_cache() {
    let load = Load {
        threads: 8,
        requests_per_thread: 100,
    };
    let (registry, provider) = registry(1000, 0);

    let shared = Arc::clone(&registry);
    hammer(load, move |_, i| {
        let prompt = format!("prompt-{}", i % 10);
        let response = shared
            .generate_text(TextRequest::new("a", prompt.clone()))
            .unwrap();
        assert_eq!(response.content, prompt);
    });

    // Racing misses may each call the provider once, but most requests hit
    let calls = provider.calls.load(Ordering::SeqCst);
    assert!(calls >= 10);
    assert!(calls <= (10 * load.threads) as u64);
    assert_eq!(registry.cache().len(), 10);

    let stats = registry.cache().stats();
    assert_eq!(stats.requests, (load.threads * load.requests_per_thread) as u64);
    assert_eq!(stats.hits + stats.misses, stats.requests);
}

#[test]
fn cache_stays_bounded_under_contention() {
    let load = Load::default();
    let capacity = 50;
    let (registry, _provider) = registry(capacity, 0);

    let shared = Arc::clone(&registry);
    hammer(load, move |t, i| {
        let _ = shared.generate_text(TextRequest::new("b", format!("{t}:{i}")));
        assert!(shared.cache().len() <= capacity);
    });

    assert!(registry.cache().len() <= capacity);
    assert!(registry.cache().stats().evictions > 0);
}

#[test]
fn every_strategy_survives_concurrent_selection() {
    let strategies = [
        ROUND_ROBIN,
        WEIGHTED_ROUND_ROBIN,
        LEAST_CONNECTIONS,
        PERFORMANCE_BASED,
        COST_OPTIMIZED,
        RANDOM,
    ];
    let (registry, _provider) = registry(10_000, 5);

    let shared = Arc::clone(&registry);
    hammer(Load::default(), move |t, i| {
        let strategy = strategies[(t + i) % strategies.len()];
        let request = TextRequest::new("", format!("{strategy}-{t}-{i}"))
            .with_requirements(SelectionRequirements::new().with_strategy(strategy));
        match shared.generate_text(request) {
            Ok(response) => assert!(["a", "b", "c"].contains(&response.meta.model_id.as_str())),
            Err(err) => assert!(err.to_string().contains("timed out"), "{err}"),
        }
    });
}

#[test]
fn model_table_mutations_race_with_selection() {
    let (registry, _provider) = registry(10_000, 0);

    let writer = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for i in 0..200 {
                let id = format!("dyn-{}", i % 5);
                registry.register(Model::new(id.clone(), "counting", Modality::Text));
                if i % 3 == 0 {
                    let _ = registry.deactivate(&id);
                }
            }
        })
    };

    let shared = Arc::clone(&registry);
    hammer(
        Load {
            threads: 4,
            requests_per_thread: 100,
        },
        move |t, i| {
            // "a", "b" and "c" stay active, so selection always succeeds
            let response = shared
                .generate_text(TextRequest::new("", format!("m{t}-{i}")))
                .unwrap();
            assert!(!response.meta.model_id.is_empty());
        },
    );
    writer.join().unwrap();

    assert_eq!(registry.list().len(), 8);
}

#[test]
fn monitor_sweep_races_with_recording() {
    let (monitor, _alerts) = ModelMonitor::new(MonitorConfig {
        staleness_secs: 3600,
        ..MonitorConfig::default()
    });
    let monitor = Arc::new(monitor);

    let sweeper = {
        let monitor = Arc::clone(&monitor);
        thread::spawn(move || {
            for _ in 0..50 {
                // Nothing is stale within the hour
                assert!(monitor.sweep_stale().is_empty());
                monitor.take_snapshots();
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    let shared = Arc::clone(&monitor);
    hammer(Load::default(), move |t, _| {
        let id = format!("m{}", t % 4);
        shared.begin_request(&id);
        shared.record_request(&id, Duration::from_millis(20), 0.001);
        shared.end_request(&id);
    });
    sweeper.join().unwrap();

    let all = monitor.snapshot_all();
    assert_eq!(all.len(), 4);
    let total: u64 = all.values().map(|m| m.request_count).sum();
    assert_eq!(total, (Load::default().threads * Load::default().requests_per_thread) as u64);
    for metrics in all.values() {
        assert_eq!(metrics.status, HealthStatus::Healthy);
        assert_eq!(metrics.current_load, 0);
        assert!((metrics.avg_latency_ms - 20.0).abs() < 1e-6);
    }
}
