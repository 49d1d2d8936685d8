use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relaynet::base::neterror::NetError;
use relaynet::config::PoolConfig;
use relaynet::socket::pool::{ConnectionPool, Connector, Poolable};
use relaynet::socket::route::Route;

struct BenchConn;

impl Poolable for BenchConn {
    fn is_open(&self) -> bool {
        true
    }
}

struct BenchConnector;

impl Connector for BenchConnector {
    type Connection = BenchConn;

    async fn connect(&self, _route: &Route) -> Result<BenchConn, NetError> {
        Ok(BenchConn)
    }
}

/// Lease/release cycles against an in-memory connector.
/// No network I/O, so this measures pool bookkeeping only.
fn benchmark_pool_operations(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let pool = ConnectionPool::new(BenchConnector, PoolConfig::default());
    let route = Route::new("http", "example.com", 80);
    let (pool_ref, route_ref) = (&pool, &route);

    c.bench_function("pool_lease_release_reuse", |b| {
        b.to_async(&rt).iter(|| async move {
            let lease = pool_ref.lease(route_ref).await.unwrap();
            lease.release(true);
        })
    });

    c.bench_function("pool_lease_close", |b| {
        b.to_async(&rt).iter(|| async move {
            let lease = pool_ref.lease(route_ref).await.unwrap();
            lease.close();
        })
    });

    // Pool statistics (pure memory operations)
    c.bench_function("pool_stats", |b| {
        b.iter(|| {
            let _ = black_box(pool.total_open());
            let _ = black_box(pool.leased_count(&route));
            let _ = black_box(pool.idle_count());
        })
    });
}

criterion_group!(benches, benchmark_pool_operations);
criterion_main!(benches);
