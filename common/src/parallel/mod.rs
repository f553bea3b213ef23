//! Parallel processing utilities built on rayon.
//!
//! Two shapes of parallelism are covered: bounded fan-out over independent
//! work items (tiles) and row-aligned chunking of a single image buffer.

use rayon::prelude::*;


/// Chunks per rayon thread. More chunks than threads keeps the pool busy
/// when rows have uneven cost.
const CHUNKS_PER_THREAD: usize = 3;

#[inline]
fn rows_per_chunk(height: usize) -> usize {
    let num_chunks = rayon::current_num_threads() * CHUNKS_PER_THREAD;
    (height / num_chunks).max(1)
}

/// Maps `f` over `items` in parallel with at most `max_concurrent` items in flight.
///
/// Output order matches input order.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn par_map_limited<T, R, F>(items: &[T], max_concurrent: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    items
        .chunks(max_concurrent)
        .flat_map(|batch| batch.par_iter().map(&f).collect::<Vec<R>>())
        .collect()
}

/// Fallible [`par_map_limited`]. Returns the first error of the first failing
/// batch; items of later batches are never started.
pub fn try_par_map_limited<T, R, E, F>(
    items: &[T],
    max_concurrent: usize,
    f: F,
) -> Result<Vec<R>, E>
where
    T: Sync,
    R: Send,
    E: Send,
    F: Fn(&T) -> Result<R, E> + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(items.len());
    for batch in items.chunks(max_concurrent) {
        let batch_results: Vec<R> = batch.par_iter().map(&f).collect::<Result<_, E>>()?;
        results.extend(batch_results);
    }
    Ok(results)
}

/// Row-aligned mutable chunking of a row-major buffer.
pub trait ParRowsMutAuto<T: Send> {
    /// Splits into parallel chunks of whole rows, yielding
    /// `(first_row, chunk)` pairs.
    fn par_rows_mut_auto<'a>(
        &'a mut self,
        width: usize,
    ) -> impl IndexedParallelIterator<Item = (usize, &'a mut [T])>
    where
        T: 'a;
}

impl<T: Send> ParRowsMutAuto<T> for [T] {
    fn par_rows_mut_auto<'a>(
        &'a mut self,
        width: usize,
    ) -> impl IndexedParallelIterator<Item = (usize, &'a mut [T])>
    where
        T: 'a {
        assert!(width > 0, "row width must be > 0");
        let rows = rows_per_chunk(self.len() / width);
        self.par_chunks_mut(width * rows)
            .enumerate()
            .map(move |(chunk_idx, chunk)| (chunk_idx * rows, chunk))
    }
}
