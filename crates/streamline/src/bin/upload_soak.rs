//! # Upload Soak
//!
//! Drives one loader from many producer threads over the host backend,
//! then checks every destination buffer against a checksum of what was
//! sent.
//!
//! ## Usage
//!
//! ```bash
//! upload_soak --config loader.toml --threads 8 --requests 500 --delay-us 200
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use streamline::{
    BufferDesc, BufferLoadDesc, HostBackend, HostBackendConfig, LoadedBuffer, LoaderConfig,
    LoaderError, LoaderResult, LoaderStats, MemoryUsage, ResourceLoader,
};

/// Command line options.
struct SoakOptions {
    config: Option<String>,
    threads: u64,
    requests: u64,
    max_upload: usize,
    delay_us: u64,
    seed: u64,
}

impl Default for SoakOptions {
    fn default() -> Self {
        Self {
            config: None,
            threads: 4,
            requests: 250,
            max_upload: 64 * 1024,
            delay_us: 100,
            seed: 0x5EED,
        }
    }
}

/// Outcome of one soak run.
struct SoakReport {
    uploads: usize,
    mismatches: usize,
    elapsed: Duration,
    stats: LoaderStats,
}

fn parse_args() -> Option<SoakOptions> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = SoakOptions::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--config" | "-c" => {
                options.config = value.cloned();
                i += 1;
            }
            "--threads" | "-t" => {
                options.threads = value.and_then(|v| v.parse().ok()).unwrap_or(options.threads);
                i += 1;
            }
            "--requests" | "-r" => {
                options.requests = value.and_then(|v| v.parse().ok()).unwrap_or(options.requests);
                i += 1;
            }
            "--max-upload" | "-m" => {
                options.max_upload = value
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(options.max_upload)
                    .max(1);
                i += 1;
            }
            "--delay-us" | "-d" => {
                options.delay_us = value.and_then(|v| v.parse().ok()).unwrap_or(options.delay_us);
                i += 1;
            }
            "--seed" | "-s" => {
                options.seed = value.and_then(|v| v.parse().ok()).unwrap_or(options.seed);
                i += 1;
            }
            "--help" | "-h" => {
                println!("Usage: upload_soak [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>        Loader config TOML (default: built-in)");
                println!("  -t, --threads <NUM>        Producer threads (default: 4)");
                println!("  -r, --requests <NUM>       Uploads per thread (default: 250)");
                println!("  -m, --max-upload <BYTES>   Largest upload (default: 65536)");
                println!("  -d, --delay-us <US>        Simulated execution delay (default: 100)");
                println!("  -s, --seed <NUM>           Payload seed");
                println!("  -h, --help                 Show this help");
                return None;
            }
            other => eprintln!("Ignoring unknown argument '{other}'"),
        }
        i += 1;
    }
    Some(options)
}

fn checksum(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x100_0000_01b3)
    })
}

fn produce(
    loader: &ResourceLoader<HostBackend>,
    seed: u64,
    requests: u64,
    max_upload: usize,
) -> LoaderResult<Vec<(LoadedBuffer<HostBackend>, u64)>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..requests)
        .map(|i| {
            let len = rng.gen_range(1..=max_upload);
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let expected = checksum(&payload);
            let desc = BufferDesc::new(len as u64, MemoryUsage::GpuOnly)
                .with_label(format!("soak-{seed}-{i}"));
            let loaded = loader.add_resource(BufferLoadDesc::new(desc).with_data(payload))?;
            Ok((loaded, expected))
        })
        .collect()
}

fn run(options: &SoakOptions) -> LoaderResult<SoakReport> {
    let config = match &options.config {
        Some(path) => LoaderConfig::from_toml_file(path)?,
        None => LoaderConfig::default(),
    };
    let backend = HostBackend::new(
        HostBackendConfig::default()
            .with_execution_delay(Duration::from_micros(options.delay_us)),
    );
    let loader = Arc::new(ResourceLoader::new(Arc::new(backend), config)?);

    let start = Instant::now();
    let producers: Vec<_> = (0..options.threads)
        .map(|t| {
            let loader = Arc::clone(&loader);
            let seed = options.seed.wrapping_add(t);
            let (requests, max_upload) = (options.requests, options.max_upload);
            thread::spawn(move || produce(&loader, seed, requests, max_upload))
        })
        .collect();

    let mut uploads = Vec::new();
    for producer in producers {
        let produced = producer
            .join()
            .map_err(|_| LoaderError::Spawn("producer thread panicked".to_string()))??;
        uploads.extend(produced);
    }

    loader.wait_for_all_resource_loads()?;
    let elapsed = start.elapsed();

    let mut mismatches = 0;
    for (loaded, expected) in &uploads {
        loader.wait_for_token(loaded.token)?;
        if checksum(&loaded.buffer.contents()) != *expected {
            tracing::error!("Buffer {} does not match what was uploaded", loaded.buffer.label());
            mismatches += 1;
        }
    }

    Ok(SoakReport {
        uploads: uploads.len(),
        mismatches,
        elapsed,
        stats: loader.stats(),
    })
}

#[allow(clippy::cast_precision_loss)]
fn print_report(report: &SoakReport) {
    let stats = &report.stats;
    let secs = report.elapsed.as_secs_f64().max(f64::EPSILON);

    println!("┌─ THROUGHPUT ───────────────────────────────────────────────────┐");
    println!("│ Duration:           {:.3}s", secs);
    println!("│ Uploads:            {}", report.uploads);
    println!("│ Bytes uploaded:     {}", stats.bytes_uploaded);
    println!("│ MiB/s:              {:.1}", stats.bytes_uploaded as f64 / secs / 1_048_576.0);
    println!("└────────────────────────────────────────────────────────────────┘");
    println!();
    println!("┌─ STREAMER ─────────────────────────────────────────────────────┐");
    println!("│ Submissions:        {}", stats.submissions);
    println!("│ Bytes/submission:   {:.0}", stats.avg_bytes_per_submission());
    println!("│ Staging allocs:     {}", stats.staging_allocations);
    println!("│ Ring rotations:     {}", stats.staging_full_rotations);
    println!("│ Split chunks:       {}", stats.split_chunks);
    println!("│ Dedicated buffers:  {}", stats.dedicated_buffers);
    println!("│ Fence stalls:       {}", stats.fence_stalls);
    println!("│ Invalid requests:   {}", stats.invalid_requests);
    println!("└────────────────────────────────────────────────────────────────┘");
    println!();

    if report.mismatches == 0 {
        println!("✓ All {} buffers match their checksums", report.uploads);
    } else {
        println!("✗ {} of {} buffers are corrupt", report.mismatches, report.uploads);
    }
}

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         STREAMLINE UPLOAD SOAK                                   ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let Some(options) = parse_args() else {
        return;
    };
    println!(
        "{} threads x {} uploads, up to {} bytes each, {}us simulated delay",
        options.threads, options.requests, options.max_upload, options.delay_us
    );
    println!();

    match run(&options) {
        Ok(report) => {
            print_report(&report);
            tracing::info!("Soak finished in {:?}", report.elapsed);
            if report.mismatches > 0 {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("✗ Soak failed: {e}");
            std::process::exit(1);
        }
    }
}
