//! Integration tests for the resource loader over the host backend.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use streamline_gpu::{
    Backend, BufferDesc, BufferUsage, GpuBuffer, HostBackend, HostBackendConfig, HostBuffer,
    MemoryUsage, ResourceState,
};
use streamline_loader::{
    BufferLoadDesc, BufferUpdateDesc, LargeUploadPolicy, LoaderConfig, LoaderError,
    MappedRangeFlags, ResourceLoader, SyncToken,
};

fn loader_with(backend: HostBackend, config: LoaderConfig) -> ResourceLoader<HostBackend> {
    ResourceLoader::new(Arc::new(backend), config).unwrap()
}

fn gpu_buffer(loader: &ResourceLoader<HostBackend>, size: u64) -> Arc<HostBuffer> {
    loader
        .backend()
        .create_buffer(&BufferDesc::new(size, MemoryUsage::GpuOnly))
        .unwrap()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn checksum(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x100_0000_01b3)
    })
}

#[test]
fn test_uploads_to_one_buffer_apply_in_order() {
    let loader = loader_with(HostBackend::default(), LoaderConfig::default());
    let dst = gpu_buffer(&loader, 16);

    let tokens: Vec<SyncToken> = (0..50u8)
        .map(|i| {
            loader
                .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), vec![i; 16])
                .unwrap()
        })
        .collect();

    assert!(tokens.windows(2).all(|w| w[0] < w[1]));
    loader.wait_for_token(*tokens.last().unwrap()).unwrap();

    assert!(tokens.iter().all(|t| loader.is_token_completed(*t)));
    assert_eq!(dst.contents(), vec![49; 16]);
}

#[test]
fn test_700_byte_upload_through_256_byte_ring() {
    let loader = loader_with(
        HostBackend::default(),
        LoaderConfig::default()
            .with_staging_buffer_size(256)
            .with_buffer_count(3),
    );
    let dst = gpu_buffer(&loader, 700);
    let payload = pattern(700, 3);

    let token = loader
        .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), payload.clone())
        .unwrap();
    loader.wait_for_token(token).unwrap();

    assert_eq!(dst.contents(), payload);
    assert_eq!(loader.backend().submission_count(), 3);

    let stats = loader.stats();
    assert_eq!(stats.split_chunks, 3);
    assert_eq!(stats.submissions, 3);
    assert_eq!(stats.bytes_uploaded, 700);
}

#[test]
fn test_payload_larger_than_smallest_ring() {
    let loader = loader_with(
        HostBackend::default(),
        LoaderConfig::default()
            .with_staging_buffer_size(32)
            .with_buffer_count(2),
    );
    let dst = gpu_buffer(&loader, 80);
    let payload = pattern(80, 11);

    let token = loader
        .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), payload.clone())
        .unwrap();
    loader.wait_for_token(token).unwrap();

    assert_eq!(dst.contents(), payload);
    assert_eq!(loader.stats().submissions, 3);
}

#[test]
fn test_concurrent_producers_under_backpressure() {
    let loader = Arc::new(loader_with(
        HostBackend::new(
            HostBackendConfig::default().with_execution_delay(Duration::from_millis(1)),
        ),
        LoaderConfig::default()
            .with_staging_buffer_size(256)
            .with_buffer_count(2),
    ));

    let handles: Vec<_> = (0..4u64)
        .map(|seed| {
            let loader = Arc::clone(&loader);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                (0..25)
                    .map(|_| {
                        let len = rng.gen_range(1..600usize);
                        let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                        let loaded = loader
                            .add_resource(
                                BufferLoadDesc::new(BufferDesc::new(
                                    len as u64,
                                    MemoryUsage::GpuOnly,
                                ))
                                .with_data(payload.clone()),
                            )
                            .unwrap();
                        (loaded, checksum(&payload))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let uploads: Vec<_> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    assert_eq!(uploads.len(), 100);

    for (loaded, expected) in &uploads {
        loader.wait_for_token(loaded.token).unwrap();
        assert_eq!(checksum(&loaded.buffer.contents()), *expected);
    }
    assert!(loader.all_resource_loads_completed());
    assert!(loader.stats().staging_full_rotations > 0);
}

#[test]
fn test_wait_on_completed_token_returns_immediately() {
    let loader = loader_with(HostBackend::default(), LoaderConfig::default());
    let dst = gpu_buffer(&loader, 4);
    let token = loader
        .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), vec![1; 4])
        .unwrap();

    loader.wait_for_token(token).unwrap();
    loader.wait_for_token(token).unwrap();
    assert!(loader.wait_for_token_timeout(token, Duration::ZERO).unwrap());
    assert!(loader.last_token_completed() >= token);
    assert!(loader.wait_for_token(SyncToken::NONE).is_ok());
}

#[test]
fn test_wait_for_all_covers_tokens_issued_before_it() {
    let loader = Arc::new(loader_with(
        HostBackend::new(
            HostBackendConfig::default().with_execution_delay(Duration::from_millis(2)),
        ),
        LoaderConfig::default(),
    ));
    let (sender, receiver) = mpsc::channel();

    let producers: Vec<_> = (0..5u8)
        .map(|i| {
            let loader = Arc::clone(&loader);
            let sender = sender.clone();
            thread::spawn(move || {
                let dst = gpu_buffer(&loader, 128);
                let token = loader
                    .update_resource(BufferUpdateDesc::whole(dst), vec![i; 128])
                    .unwrap();
                sender.send(token).unwrap();
            })
        })
        .collect();
    drop(sender);

    let waiter = {
        let loader = Arc::clone(&loader);
        thread::spawn(move || {
            let tokens: Vec<SyncToken> = receiver.iter().take(5).collect();
            loader.wait_for_all_resource_loads().unwrap();
            tokens.iter().all(|t| loader.is_token_completed(*t))
        })
    };

    for producer in producers {
        producer.join().unwrap();
    }
    assert!(waiter.join().unwrap());
}

#[test]
fn test_streamer_rejection_fails_only_that_token() {
    let loader = loader_with(HostBackend::default(), LoaderConfig::default());
    let doomed = gpu_buffer(&loader, 16);
    let healthy = gpu_buffer(&loader, 16);
    doomed.destroy();

    let bad = loader
        .update_resource(BufferUpdateDesc::whole(Arc::clone(&doomed)), vec![1; 16])
        .unwrap();
    let good = loader
        .update_resource(BufferUpdateDesc::whole(Arc::clone(&healthy)), vec![2; 16])
        .unwrap();

    assert!(matches!(
        loader.wait_for_token(bad),
        Err(LoaderError::RequestFailed { token, .. }) if token == bad
    ));
    loader.wait_for_token(good).unwrap();
    assert!(loader.is_token_completed(bad));
    assert_eq!(healthy.contents(), vec![2; 16]);
    assert_eq!(loader.stats().invalid_requests, 1);
}

#[test]
fn test_submission_failure_poisons_loader() {
    let loader = loader_with(HostBackend::default(), LoaderConfig::default());
    let dst = gpu_buffer(&loader, 16);
    loader.backend().fail_next_submit();

    let token = loader
        .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), vec![1; 16])
        .unwrap();

    assert!(matches!(
        loader.wait_for_token(token),
        Err(LoaderError::DeviceLost(_))
    ));
    assert!(matches!(
        loader.wait_for_all_resource_loads(),
        Err(LoaderError::DeviceLost(_))
    ));
    assert!(matches!(
        loader.update_resource(BufferUpdateDesc::whole(dst), vec![2; 16]),
        Err(LoaderError::DeviceLost(_))
    ));
    assert!(!loader.is_token_completed(token));
}

#[test]
fn test_fence_timeout_is_device_loss() {
    let loader = loader_with(
        HostBackend::new(
            HostBackendConfig::default().with_execution_delay(Duration::from_millis(300)),
        ),
        LoaderConfig::default()
            .with_staging_buffer_size(32)
            .with_buffer_count(1)
            .with_fence_timeout_ms(20),
    );
    let dst = gpu_buffer(&loader, 96);

    let token = loader
        .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), vec![1; 96])
        .unwrap();

    let err = loader.wait_for_token(token).unwrap_err();
    assert!(err.is_fatal());
    assert!(loader.stats().fence_stalls >= 1);
}

#[test]
fn test_dedicated_policy_uses_one_submission() {
    let loader = loader_with(
        HostBackend::default(),
        LoaderConfig::default()
            .with_staging_buffer_size(64)
            .with_large_upload_policy(LargeUploadPolicy::DedicatedBuffer),
    );
    let dst = gpu_buffer(&loader, 200);
    let live_before = loader.backend().live_buffer_count();
    let payload = pattern(200, 5);

    let token = loader
        .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), payload.clone())
        .unwrap();
    loader.wait_for_token(token).unwrap();

    assert_eq!(dst.contents(), payload);
    assert_eq!(loader.backend().submission_count(), 1);
    assert_eq!(loader.stats().dedicated_buffers, 1);
    assert_eq!(loader.backend().live_buffer_count(), live_before);
}

#[test]
fn test_begin_end_update_device_local() {
    let loader = loader_with(HostBackend::default(), LoaderConfig::default());
    let dst = gpu_buffer(&loader, 64);
    let live_before = loader.backend().live_buffer_count();

    let update = loader
        .begin_update_resource(BufferUpdateDesc::range(Arc::clone(&dst), 16, 32))
        .unwrap();
    assert!(update.mapped().flags().contains(MappedRangeFlags::TEMPORARY));
    update.write_pod(0, &[0xAABB_CCDDu32; 8]).unwrap();
    assert!(matches!(
        update.write(31, &[0, 0]),
        Err(LoaderError::InvalidRequest(_))
    ));

    let token = loader.end_update_resource(update).unwrap();
    loader.wait_for_token(token).unwrap();

    let contents = dst.contents();
    assert_eq!(&contents[..16], &[0; 16]);
    assert_eq!(&contents[16..20], &0xAABB_CCDDu32.to_le_bytes());
    assert_eq!(&contents[48..], &[0; 16]);
    assert_eq!(loader.backend().live_buffer_count(), live_before);
}

#[test]
fn test_begin_end_update_host_visible() {
    let loader = loader_with(HostBackend::default(), LoaderConfig::default());
    let loaded = loader
        .add_resource(BufferLoadDesc::new(BufferDesc::new(8, MemoryUsage::CpuToGpu)))
        .unwrap();
    assert!(loaded.token.is_none());

    let update = loader
        .begin_update_resource(BufferUpdateDesc::whole(Arc::clone(&loaded.buffer)))
        .unwrap();
    assert!(update
        .mapped()
        .flags()
        .contains(MappedRangeFlags::UNMAP_ON_RELEASE));
    assert!(loaded.buffer.is_mapped());
    update.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

    let token = loader.end_update_resource(update).unwrap();
    assert_eq!(token, SyncToken::NONE);
    assert!(!loaded.buffer.is_mapped());
    assert_eq!(loaded.buffer.contents(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_concurrent_direct_writes_to_one_host_visible_buffer() {
    let loader = Arc::new(loader_with(HostBackend::default(), LoaderConfig::default()));
    let shared = loader
        .add_resource(BufferLoadDesc::new(BufferDesc::new(80, MemoryUsage::CpuToGpu)))
        .unwrap()
        .buffer;

    let held = loader
        .begin_update_resource(BufferUpdateDesc::range(Arc::clone(&shared), 64, 16))
        .unwrap();

    let writers: Vec<_> = (0..4u8)
        .map(|i| {
            let loader = Arc::clone(&loader);
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                (0..2000)
                    .map(|_| {
                        loader.update_resource(
                            BufferUpdateDesc::range(Arc::clone(&shared), u64::from(i) * 16, 16),
                            vec![i + 1; 16],
                        )
                    })
                    .filter(Result::is_err)
                    .count()
            })
        })
        .collect();
    let errors: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();
    assert_eq!(errors, 0);

    held.write(0, &[9; 16]).unwrap();
    assert!(shared.is_mapped());
    assert_eq!(loader.end_update_resource(held).unwrap(), SyncToken::NONE);
    assert!(!shared.is_mapped());

    let contents = shared.contents();
    for i in 0..4u8 {
        let start = usize::from(i) * 16;
        assert_eq!(&contents[start..start + 16], &[i + 1; 16]);
    }
    assert_eq!(&contents[64..], &[9; 16]);
}

#[test]
fn test_abandoned_update_releases_temporary() {
    let loader = loader_with(HostBackend::default(), LoaderConfig::default());
    let dst = gpu_buffer(&loader, 64);
    let live_before = loader.backend().live_buffer_count();

    let update = loader
        .begin_update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)))
        .unwrap();
    assert_eq!(loader.backend().live_buffer_count(), live_before + 1);
    drop(update);

    assert_eq!(loader.backend().live_buffer_count(), live_before);
    assert_eq!(loader.last_token_issued(), SyncToken::NONE);
}

#[test]
fn test_barrier_is_ordered_after_upload() {
    let loader = loader_with(HostBackend::default(), LoaderConfig::default());
    let loaded = loader
        .add_resource(
            BufferLoadDesc::new(
                BufferDesc::new(32, MemoryUsage::GpuOnly).with_usage(BufferUsage::VERTEX),
            )
            .with_data(pattern(32, 1)),
        )
        .unwrap();

    let token = loader
        .transition_buffer(
            &loaded.buffer,
            ResourceState::Common,
            ResourceState::VertexAndConstantBuffer,
        )
        .unwrap();
    assert!(token > loaded.token);
    loader.wait_for_token(token).unwrap();

    assert_eq!(
        loaded.buffer.current_state(),
        ResourceState::VertexAndConstantBuffer
    );
    assert_eq!(loaded.buffer.contents(), pattern(32, 1));
}

#[test]
fn test_drop_drains_queued_work() {
    let backend = HostBackend::new(
        HostBackendConfig::default().with_execution_delay(Duration::from_millis(5)),
    );
    let loader = loader_with(
        backend,
        LoaderConfig::default()
            .with_staging_buffer_size(64)
            .with_buffer_count(2),
    );
    let dst = gpu_buffer(&loader, 64);

    for i in 0..20u8 {
        loader
            .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), vec![i; 64])
            .unwrap();
    }
    drop(loader);

    assert_eq!(dst.contents(), vec![19; 64]);
}

#[test]
fn test_loader_from_config_file() {
    let path = std::env::temp_dir().join(format!(
        "streamline_loader_it_{}.toml",
        std::process::id()
    ));
    std::fs::write(
        &path,
        "staging_buffer_size = 128\nbuffer_count = 3\nlarge_upload_policy = \"split\"\n",
    )
    .unwrap();
    let config = LoaderConfig::from_toml_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let loader = loader_with(HostBackend::default(), config);
    assert_eq!(loader.config().buffer_count, 3);

    let dst = gpu_buffer(&loader, 300);
    let token = loader
        .update_resource(BufferUpdateDesc::whole(Arc::clone(&dst)), pattern(300, 9))
        .unwrap();
    loader.wait_for_token(token).unwrap();
    assert_eq!(dst.contents(), pattern(300, 9));
}
