//! Benchmarks for the weaver scheduler.
//!
//! Benchmarks cover:
//! - Enqueue and drain of independent jobs
//! - Strictly ordered sequences
//! - Jobs admitted through a resource restriction policy
//! - Dependency chains

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use threadweaver::{
    JobHandle, JobSequence, Priority, ResourceRestrictionPolicy, Weaver, WeaverConfig,
};

// ============================================================================
// Helpers
// ============================================================================

fn counting_job(counter: &Arc<AtomicU64>) -> JobHandle {
    let counter = Arc::clone(counter);
    JobHandle::from_fn(move |_| {
        counter.fetch_add(black_box(1), Ordering::Relaxed);
        Ok(())
    })
}

fn weaver(threads: usize) -> Weaver {
    Weaver::new(WeaverConfig::new().with_worker_count(threads)).expect("valid bench config")
}

// ============================================================================
// Independent jobs
// ============================================================================

fn bench_enqueue_finish(c: &mut Criterion) {
    let mut group = c.benchmark_group("weaver_enqueue_finish");
    let weaver = weaver(4);

    for size in [100_u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let counter = Arc::new(AtomicU64::new(0));
            b.iter(|| {
                let jobs: Vec<_> = (0..size).map(|_| counting_job(&counter)).collect();
                weaver.enqueue_all(&jobs).expect("enqueue");
                weaver.finish();
            });
        });
    }
    group.finish();
}

fn bench_mixed_priorities(c: &mut Criterion) {
    let mut group = c.benchmark_group("weaver_mixed_priorities");
    let weaver = weaver(4);
    let priorities = [Priority::Low, Priority::Normal, Priority::High, Priority::Critical];

    group.bench_function("mixed_priority_scheduling", |b| {
        let counter = Arc::new(AtomicU64::new(0));
        b.iter(|| {
            let jobs: Vec<_> = (0..1_000)
                .map(|i| counting_job(&counter).with_priority(priorities[i % priorities.len()]))
                .collect();
            weaver.enqueue_all(&jobs).expect("enqueue");
            weaver.finish();
        });
    });
    group.finish();
}

// ============================================================================
// Ordering
// ============================================================================

fn bench_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("weaver_sequence");
    let weaver = weaver(4);

    for size in [10_u64, 100, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let counter = Arc::new(AtomicU64::new(0));
            b.iter(|| {
                let sequence = JobSequence::new();
                for _ in 0..size {
                    sequence.append(&counting_job(&counter));
                }
                weaver.enqueue(&sequence).expect("enqueue");
                weaver.finish();
            });
        });
    }
    group.finish();
}

fn bench_dependency_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("weaver_dependency_chain");
    let weaver = weaver(4);

    for size in [10_u64, 100, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let counter = Arc::new(AtomicU64::new(0));
            b.iter(|| {
                let jobs: Vec<_> = (0..size).map(|_| counting_job(&counter)).collect();
                for pair in jobs.windows(2) {
                    pair[1].add_dependency(&pair[0]);
                }
                // Enqueue in reverse so every scan has to skip blocked jobs.
                for job in jobs.iter().rev() {
                    weaver.enqueue(job).expect("enqueue");
                }
                weaver.finish();
            });
        });
    }
    group.finish();
}

// ============================================================================
// Policies
// ============================================================================

fn bench_restricted(c: &mut Criterion) {
    let mut group = c.benchmark_group("weaver_resource_restriction");
    let weaver = weaver(8);

    for cap in [1_usize, 2, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(cap), &cap, |b, &cap| {
            let counter = Arc::new(AtomicU64::new(0));
            let policy = Arc::new(ResourceRestrictionPolicy::new(cap));
            b.iter(|| {
                let jobs: Vec<_> = (0..500)
                    .map(|_| {
                        let job = counting_job(&counter);
                        job.assign_queue_policy(policy.clone());
                        job
                    })
                    .collect();
                weaver.enqueue_all(&jobs).expect("enqueue");
                weaver.finish();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_enqueue_finish,
    bench_mixed_priorities,
    bench_sequence,
    bench_dependency_chain,
    bench_restricted
);
criterion_main!(benches);
