//! # Upload Benchmark
//!
//! End-to-end cost of streaming through the host backend:
//! 1. Many small uploads batched into few submissions
//! 2. One upload several times larger than a staging ring
//! 3. Producer-side cost of queuing alone

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use streamline_gpu::{Backend, BufferDesc, HostBackend, MemoryUsage};
use streamline_loader::{BufferUpdateDesc, LoaderConfig, ResourceLoader};

fn loader(ring: u64, sets: usize) -> ResourceLoader<HostBackend> {
    ResourceLoader::new(
        Arc::new(HostBackend::default()),
        LoaderConfig::default()
            .with_staging_buffer_size(ring)
            .with_buffer_count(sets),
    )
    .expect("loader")
}

// =============================================================================
// SMALL UPLOADS
// =============================================================================

fn bench_small_uploads(c: &mut Criterion) {
    let mut group = c.benchmark_group("small_uploads_x256");
    let loader = loader(64 * 1024, 2);

    for size in [64u64, 1024, 4096] {
        let dst = loader
            .backend()
            .create_buffer(&BufferDesc::new(size, MemoryUsage::GpuOnly))
            .expect("buffer");
        let payload = vec![0xA5u8; size as usize];

        group.throughput(Throughput::Bytes(size * 256));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                for _ in 0..256 {
                    loader
                        .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), payload.clone())
                        .expect("queued");
                }
                loader.wait_for_all_resource_loads().expect("drained");
            });
        });
    }

    group.finish();
}

// =============================================================================
// LARGE UPLOADS
// =============================================================================

fn bench_split_upload(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_upload_1mib");
    let size = 1024 * 1024u64;

    for ring in [64 * 1024u64, 256 * 1024] {
        let loader = loader(ring, 3);
        let dst = loader
            .backend()
            .create_buffer(&BufferDesc::new(size, MemoryUsage::GpuOnly))
            .expect("buffer");
        let payload = vec![0x5Au8; size as usize];

        group.throughput(Throughput::Bytes(size));
        group.bench_with_input(BenchmarkId::from_parameter(ring), &ring, |b, _| {
            b.iter(|| {
                let token = loader
                    .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), payload.clone())
                    .expect("queued");
                loader.wait_for_token(token).expect("uploaded");
            });
        });
    }

    group.finish();
}

// =============================================================================
// QUEUING
// =============================================================================

fn bench_enqueue(c: &mut Criterion) {
    let loader = loader(8 * 1024 * 1024, 2);
    let dst = loader
        .backend()
        .create_buffer(&BufferDesc::new(256, MemoryUsage::GpuOnly))
        .expect("buffer");

    c.bench_function("enqueue_256b", |b| {
        b.iter(|| {
            black_box(
                loader
                    .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), vec![1; 256])
                    .expect("queued"),
            )
        });
    });
    loader.wait_for_all_resource_loads().expect("drained");
}

criterion_group!(benches, bench_small_uploads, bench_split_upload, bench_enqueue);
criterion_main!(benches);
