use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rask_log_pipeline::MemorySink;
use rask_log_pipeline::buffer::{BufferPool, OnFullPolicy};
use rask_log_pipeline::queue::{QueueConfig, WriteQueue};
use rask_log_pipeline::writer::{AsyncConfig, AsyncWriter};
use std::sync::Arc;
use std::time::Duration;

const RECORD: &[u8] = b"2024-01-01T00:00:00Z INFO request completed status=200 latency_ms=12\n";

fn bench_queue_enqueue_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_enqueue_drain");

    for &workers in [1usize, 4].iter() {
        let records = 10_000;
        group.throughput(Throughput::Elements(records as u64));
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter(|| {
                let rt = tokio::runtime::Runtime::new()
                    .expect("Failed to create Tokio runtime for benchmark");
                rt.block_on(async {
                    let queue = WriteQueue::new(
                        Arc::new(MemorySink::new()),
                        QueueConfig {
                            max_queue_size: records,
                            worker_count: workers,
                            enqueue_timeout: Duration::from_secs(1),
                            ..Default::default()
                        },
                    )
                    .expect("Failed to create WriteQueue for benchmark");
                    queue.start().expect("Failed to start WriteQueue");
                    for _ in 0..records {
                        queue
                            .write(std::hint::black_box(RECORD))
                            .await
                            .expect("Failed to enqueue record in benchmark");
                    }
                    queue.stop().await.expect("Failed to stop WriteQueue");
                });
            });
        });
    }
    group.finish();
}

fn bench_async_writer_policies(c: &mut Criterion) {
    let mut group = c.benchmark_group("async_writer_on_full");
    let records = 10_000;
    group.throughput(Throughput::Elements(records as u64));

    for policy in [OnFullPolicy::Block, OnFullPolicy::Drop] {
        group.bench_with_input(BenchmarkId::from_parameter(policy.as_str()), &policy, |b, &policy| {
            b.iter(|| {
                let rt = tokio::runtime::Runtime::new()
                    .expect("Failed to create Tokio runtime for benchmark");
                rt.block_on(async {
                    let writer = AsyncWriter::new(
                        Arc::new(MemorySink::new()),
                        AsyncConfig {
                            buffer_size: 1024,
                            on_full: policy,
                            ..Default::default()
                        },
                    )
                    .expect("Failed to create AsyncWriter for benchmark");
                    for _ in 0..records {
                        writer
                            .write(std::hint::black_box(RECORD))
                            .await
                            .expect("Failed to write record in benchmark");
                    }
                    writer.stop().await.expect("Failed to stop AsyncWriter");
                });
            });
        });
    }
    group.finish();
}

fn bench_buffer_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_pool");
    group.throughput(Throughput::Elements(1));

    let pool = BufferPool::new(16, 64 * 1024);
    group.bench_function("acquire_release", |b| {
        b.iter(|| {
            let mut buf = pool.acquire();
            buf.extend_from_slice(std::hint::black_box(RECORD));
            pool.release(buf);
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_queue_enqueue_drain,
    bench_async_writer_policies,
    bench_buffer_pool
);
criterion_main!(benches);
