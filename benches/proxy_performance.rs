//! Performance benchmarks for the per-request hot path
//!
//! Routing and cache lookup run before any upstream I/O, so their cost is
//! added to every request the proxy handles.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use http::{HeaderMap, HeaderValue};
use replay_cache::domain::{CacheEntry, CacheKey};
use replay_cache::infrastructure::store::{collections, to_document, DocumentStore};
use replay_cache::infrastructure::MemoryStore;
use replay_cache::proxy::cache_lookup;
use replay_cache::proxy::router::PathRouter;
use replay_cache::proxy::types::{PathPrefix, RouteRule, TargetUrl};
use std::hint::black_box;

fn router_with_rules(count: usize) -> PathRouter {
    let rules = (0..count)
        .map(|i| {
            RouteRule::new(
                PathPrefix::try_new(format!("/svc{i:03}")).expect("valid prefix"),
                TargetUrl::try_new(format!("http://upstream-{i}:9000")).expect("valid target"),
            )
        })
        .collect();
    PathRouter::new(rules, None)
}

/// Worst case: the matching rule is the last one declared
///
/// Prefixes are zero-padded so no earlier rule is a string prefix of the last one.
fn bench_route_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_resolution");

    for count in [1, 10, 100] {
        let router = router_with_rules(count);
        let path = format!("/svc{:03}/widgets/42?expand=true", count - 1);
        let resolved = router.resolve(&path).map(|r| r.upstream_url());
        assert_eq!(
            resolved.as_deref(),
            Some(format!("http://upstream-{}:9000/widgets/42?expand=true", count - 1).as_str()),
            "benchmark path must resolve through the last rule"
        );

        group.bench_with_input(BenchmarkId::from_parameter(count), &path, |b, path| {
            b.iter(|| black_box(router.resolve(black_box(path)).map(|r| r.upstream_url())));
        });
    }

    group.finish();
}

fn bench_cache_lookup(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("cache_lookup");

    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    let body = vec![b'x'; 4 * 1024];

    for entries in [10, 1_000] {
        let store = MemoryStore::new();
        runtime.block_on(async {
            for i in 0..entries {
                let entry = CacheEntry::new(CacheKey::new(format!("/svc/item/{i}")), &headers, &body);
                store
                    .insert(collections::CACHE, to_document(&entry).expect("serializable"))
                    .await
                    .expect("memory insert");
            }
        });

        let hit = CacheKey::new(format!("/svc/item/{}", entries / 2));
        let miss = CacheKey::new("/svc/absent".to_string());

        group.bench_function(BenchmarkId::new("hit", entries), |b| {
            b.to_async(&runtime)
                .iter(|| async { black_box(cache_lookup::lookup(&store, &hit).await) });
        });
        group.bench_function(BenchmarkId::new("miss", entries), |b| {
            b.to_async(&runtime)
                .iter(|| async { black_box(cache_lookup::lookup(&store, &miss).await) });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_route_resolution, bench_cache_lookup);
criterion_main!(benches);
