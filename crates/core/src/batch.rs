//! Fan-out/fan-in execution for batch insert and batch search.
//!
//! Input is split into `parallelism` contiguous slices of `len / parallelism`
//! items (never more slices than items), the last slice absorbing the
//! remainder. One worker runs per
//! non-empty slice on a dedicated rayon pool, and the call returns once every
//! worker has joined. Results land at their input position regardless of
//! completion order.

use crate::error::{HnswError, Result};
use crate::hnsw::{HnswGraph, Neighbor};
use std::ops::Range;

/// Splits `0..len` into `parallelism` contiguous ranges.
///
/// Every range has `len / parallelism` items except the last, which also
/// takes the remainder. The slice count is capped at `len`, so a batch
/// smaller than `parallelism` gets one item per range; an empty batch gets a
/// single empty range.
pub fn partition(len: usize, parallelism: usize) -> Vec<Range<usize>> {
    let parallelism = parallelism.min(len).max(1);
    let chunk = len / parallelism;
    (0..parallelism)
        .map(|i| {
            let start = i * chunk;
            let end = if i == parallelism - 1 { len } else { start + chunk };
            start..end
        })
        .collect()
}

/// Runs `work(i)` for every `i in 0..len` across `parallelism` workers and
/// returns the outputs in index order.
pub(crate) fn run_partitioned<T, F>(len: usize, parallelism: usize, work: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    if parallelism == 0 {
        return Err(HnswError::InvalidArgument(
            "parallelism must be at least 1".into(),
        ));
    }
    let ranges = partition(len, parallelism);
    let workers = ranges.iter().filter(|r| !r.is_empty()).count();
    tracing::debug!(len, parallelism, workers, "batch partition");
    if workers == 0 {
        return Ok(Vec::new());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("hnsw-batch-{i}"))
        .build()
        .map_err(|e| HnswError::Io(std::io::Error::other(e.to_string())))?;

    let mut out: Vec<Option<T>> = (0..len).map(|_| None).collect();
    let work = &work;
    pool.scope(|scope| {
        let mut rest: &mut [Option<T>] = &mut out;
        for range in ranges {
            let (slots, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
            rest = tail;
            if range.is_empty() {
                continue;
            }
            scope.spawn(move |_| {
                for (slot, i) in slots.iter_mut().zip(range) {
                    *slot = Some(work(i));
                }
            });
        }
    });

    Ok(out.into_iter().flatten().collect())
}

/// Inserts `vectors[i]` under `labels[i]` for every `i`, concurrently.
///
/// Returns one outcome per item (the assigned internal id or the error), in
/// input order. A failing item never stops its siblings.
pub fn batch_insert<V>(
    graph: &HnswGraph,
    vectors: &[V],
    labels: &[u32],
    parallelism: usize,
) -> Result<Vec<Result<u32>>>
where
    V: AsRef<[f32]> + Sync,
{
    if vectors.len() != labels.len() {
        return Err(HnswError::InvalidArgument(format!(
            "{} vectors but {} labels",
            vectors.len(),
            labels.len()
        )));
    }
    let outcomes = run_partitioned(vectors.len(), parallelism, |i| {
        graph.insert(vectors[i].as_ref(), labels[i])
    })?;

    if let Some((pos, Err(first))) = outcomes.iter().enumerate().find(|(_, r)| r.is_err()) {
        tracing::warn!(
            failed = outcomes.iter().filter(|r| r.is_err()).count(),
            total = outcomes.len(),
            first_failed_position = pos,
            error = %first,
            "batch insert had failures"
        );
    }
    Ok(outcomes)
}

/// Searches every query concurrently. Result `i` belongs to `queries[i]`.
pub fn batch_search<V>(
    graph: &HnswGraph,
    queries: &[V],
    k: usize,
    parallelism: usize,
) -> Result<Vec<Result<Vec<Neighbor>>>>
where
    V: AsRef<[f32]> + Sync,
{
    run_partitioned(queries.len(), parallelism, |i| {
        graph.search(queries[i].as_ref(), k)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::{HnswConfig, SpaceType};

    #[test]
    fn test_partition_even() {
        assert_eq!(partition(9, 3), vec![0..3, 3..6, 6..9]);
    }

    #[test]
    fn test_partition_remainder_goes_last() {
        assert_eq!(partition(10, 3), vec![0..3, 3..6, 6..10]);
        assert_eq!(partition(7, 4), vec![0..1, 1..2, 2..3, 3..7]);
    }

    #[test]
    fn test_partition_fewer_items_than_workers() {
        assert_eq!(partition(2, 4), vec![0..1, 1..2]);
        assert_eq!(partition(0, 2), vec![0..0]);
    }

    #[test]
    fn test_partition_huge_parallelism_is_bounded_by_len() {
        assert_eq!(partition(3, usize::MAX), vec![0..1, 1..2, 2..3]);
        assert_eq!(partition(5, 0), vec![0..5]);
    }

    #[test]
    fn test_run_partitioned_preserves_order() {
        let out = run_partitioned(103, 8, |i| i * 2).unwrap();
        assert_eq!(out, (0..103).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_run_partitioned_rejects_zero_parallelism() {
        assert!(matches!(
            run_partitioned(3, 0, |i| i),
            Err(HnswError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_batch_insert_reports_per_item() {
        let g = HnswGraph::new(HnswConfig::new(2, 10, SpaceType::L2)).unwrap();
        let vectors = vec![vec![0.0, 0.0], vec![1.0], vec![2.0, 2.0], vec![3.0, 3.0]];
        let labels = vec![0, 1, 2, 3];
        let outcomes = batch_insert(&g, &vectors, &labels, 2).unwrap();
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].is_ok());
        assert!(matches!(
            outcomes[1],
            Err(HnswError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert!(outcomes[2].is_ok());
        assert!(outcomes[3].is_ok());
        assert_eq!(g.len(), 3);
    }

    #[test]
    fn test_batch_insert_length_mismatch() {
        let g = HnswGraph::new(HnswConfig::new(2, 10, SpaceType::L2)).unwrap();
        let vectors = vec![vec![0.0, 0.0]];
        assert!(matches!(
            batch_insert(&g, &vectors, &[1, 2], 1),
            Err(HnswError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_batch_search_matches_single_search() {
        let g = HnswGraph::new(HnswConfig::new(2, 64, SpaceType::L2)).unwrap();
        for i in 0..50u32 {
            g.insert(&[i as f32, (i % 7) as f32], i).unwrap();
        }
        let queries: Vec<Vec<f32>> = (0..20).map(|i| vec![i as f32 * 2.5, 1.0]).collect();
        let batch = batch_search(&g, &queries, 5, 4).unwrap();
        assert_eq!(batch.len(), queries.len());
        for (q, result) in queries.iter().zip(&batch) {
            let single = g.search(q, 5).unwrap();
            assert_eq!(result.as_ref().unwrap(), &single);
        }
    }
}
