//! Random-data walkthrough: batch build, save, reload, and query timing.
//!
//! Usage: cargo bench --bench random_demo
//! Set RUST_LOG=hnsw_graph=debug for index-level logging.

use hnsw_graph::{Hnsw, SpaceType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const DIM: usize = 128;
const POINTS: usize = 20_000;
const QUERIES: usize = 1_000;
const K: usize = 10;

fn random_vectors(rng: &mut StdRng, n: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|_| (0..DIM).map(|_| rng.gen::<f32>()).collect())
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("hnsw_graph=info".parse()?),
        )
        .init();

    println!("=== HNSW random demo: {POINTS} x {DIM}d, cosine ===");
    println!();

    let mut rng = StdRng::seed_from_u64(47);
    let data = random_vectors(&mut rng, POINTS);
    let queries = random_vectors(&mut rng, QUERIES);
    let labels: Vec<u32> = (0..POINTS as u32).collect();
    let threads = std::thread::available_parallelism().map_or(1, |n| n.get());

    let index = Hnsw::create(DIM, 16, 200, 100, POINTS, SpaceType::Cosine)?;
    let t0 = Instant::now();
    let outcomes = index.batch_insert(&data, &labels, threads)?;
    let build = t0.elapsed();
    let failed = outcomes.iter().filter(|r| r.is_err()).count();
    println!(
        "Build: {:.2}s on {threads} threads ({:.0} inserts/s, {failed} failed)",
        build.as_secs_f64(),
        POINTS as f64 / build.as_secs_f64()
    );
    println!(
        "Memory estimate: {:.1} MiB",
        index.estimate_memory_bytes()? as f64 / (1024.0 * 1024.0)
    );

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("demo.hnsw");
    let t0 = Instant::now();
    index.save(&path)?;
    let save = t0.elapsed();
    let t0 = Instant::now();
    let loaded = Hnsw::load(&path, DIM, SpaceType::Cosine)?;
    let load = t0.elapsed();
    println!(
        "Save: {:.1} ms, load: {:.1} ms ({} bytes)",
        save.as_secs_f64() * 1e3,
        load.as_secs_f64() * 1e3,
        std::fs::metadata(&path)?.len()
    );
    index.release();

    println!();
    println!("  ef_search |    QPS    | Avg latency | Batch QPS");
    println!("  ----------+-----------+-------------+----------");
    for ef in [10, 40, 100, 200] {
        loaded.set_ef_search(ef)?;

        let t0 = Instant::now();
        for q in &queries {
            let _ = loaded.search(q, K)?;
        }
        let single = t0.elapsed();

        let t0 = Instant::now();
        let _ = loaded.batch_search(&queries, K, threads)?;
        let batch = t0.elapsed();

        println!(
            "  {:>9} | {:>9.1} | {:>8.0} us | {:>9.1}",
            ef,
            QUERIES as f64 / single.as_secs_f64(),
            single.as_micros() as f64 / QUERIES as f64,
            QUERIES as f64 / batch.as_secs_f64()
        );
    }

    println!();
    println!("=== Demo complete ===");
    Ok(())
}
