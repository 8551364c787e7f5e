//! Row-band chunking of per-pixel work.
//!
//! A grid is split into bands of `chunk_rows` full rows. Each band owns a
//! disjoint slice of the preallocated output, so workers never share a write
//! target. Under the `threading` feature bands run on the rayon pool; without
//! it the same loop runs sequentially.
//!
//! Cancellation is checked once per band, before any of its pixels are
//! touched: a band is either fully written or left untouched.

use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::error::{Error, Result};

pub const DEFAULT_CHUNK_ROWS: usize = 16;

/// Shared flag to stop a long batch between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Row-band partition of a `width × height` grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub width: usize,
    pub height: usize,
    pub chunk_rows: usize,
}

impl ChunkPlan {
    pub fn new(width: usize, height: usize, chunk_rows: usize) -> Self {
        Self { width, height, chunk_rows: chunk_rows.max(1) }
    }

    pub fn chunk_count(&self) -> usize {
        self.height.div_ceil(self.chunk_rows)
    }

    /// Cells per full band.
    pub fn chunk_len(&self) -> usize {
        self.width * self.chunk_rows
    }

    pub fn first_row(&self, chunk: usize) -> usize {
        chunk * self.chunk_rows
    }
}

/// Run `f(first_row, band)` over every band of `out` and sum the per-band
/// outcomes.
///
/// The first fatal error in band order is returned. If the flag is raised
/// mid-run, bands already written stay written and `Cancelled` reports how
/// many completed.
pub fn process_row_chunks<T, D, F>(
    out: &mut [T],
    plan: ChunkPlan,
    cancel: Option<&CancelFlag>,
    f: F,
) -> Result<D>
where
    T: Send,
    D: Default + AddAssign + Send,
    F: Fn(usize, &mut [T]) -> Result<D> + Sync + Send,
{
    debug_assert_eq!(out.len(), plan.width * plan.height);
    if out.is_empty() {
        return Ok(D::default());
    }

    let run = |(i, band): (usize, &mut [T])| -> Result<Option<D>> {
        if cancel.is_some_and(CancelFlag::is_cancelled) {
            return Ok(None);
        }
        let first_row = plan.first_row(i);
        tracing::trace!(chunk = i, first_row, rows = band.len() / plan.width, "processing chunk");
        f(first_row, band).map(Some)
    };

    #[cfg(feature = "threading")]
    let outcomes: Vec<Result<Option<D>>> = out.par_chunks_mut(plan.chunk_len()).enumerate().map(run).collect();
    #[cfg(not(feature = "threading"))]
    let outcomes: Vec<Result<Option<D>>> = out.chunks_mut(plan.chunk_len()).enumerate().map(run).collect();

    let total_chunks = outcomes.len();
    let mut completed_chunks = 0;
    let mut acc = D::default();
    for outcome in outcomes {
        if let Some(d) = outcome? {
            acc += d;
            completed_chunks += 1;
        }
    }
    if completed_chunks < total_chunks {
        return Err(Error::Cancelled { completed_chunks, total_chunks });
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Count(usize);

    impl AddAssign for Count {
        fn add_assign(&mut self, rhs: Self) {
            self.0 += rhs.0;
        }
    }

    #[test]
    fn plan_covers_ragged_last_band() {
        let plan = ChunkPlan::new(5, 10, 4);
        assert_eq!(plan.chunk_count(), 3);
        assert_eq!(plan.first_row(2), 8);
        assert_eq!(ChunkPlan::new(5, 10, 0).chunk_rows, 1);
    }

    #[test]
    fn every_cell_written_once_with_row_index() {
        let plan = ChunkPlan::new(3, 7, 2);
        let mut out = vec![usize::MAX; 21];
        let total: Count = process_row_chunks(&mut out, plan, None, |first_row, band| {
            for (i, cell) in band.iter_mut().enumerate() {
                *cell = first_row + i / plan.width;
            }
            Ok(Count(band.len()))
        })
        .unwrap();
        assert_eq!(total.0, 21);
        for (i, &row) in out.iter().enumerate() {
            assert_eq!(row, i / 3);
        }
    }

    #[test]
    fn fatal_error_propagates() {
        let plan = ChunkPlan::new(2, 4, 1);
        let mut out = vec![0u8; 8];
        let res: Result<Count> = process_row_chunks(&mut out, plan, None, |first_row, _| {
            if first_row == 2 {
                Err(Error::ModelShape { expected: 7, found: 3 }.at_pixel(2, 0))
            } else {
                Ok(Count(1))
            }
        });
        assert!(matches!(res, Err(Error::Pixel { row: 2, col: 0, .. })));
    }

    #[test]
    fn cancelled_before_start_leaves_output_untouched() {
        let flag = CancelFlag::new();
        flag.cancel();
        let plan = ChunkPlan::new(2, 4, 2);
        let mut out = vec![0u8; 8];
        let res: Result<Count> = process_row_chunks(&mut out, plan, Some(&flag), |_, band| {
            band.fill(1);
            Ok(Count(1))
        });
        assert_eq!(res.err(), Some(Error::Cancelled { completed_chunks: 0, total_chunks: 2 }));
        assert!(out.iter().all(|&v| v == 0));
    }

    #[test]
    fn cancel_mid_run_keeps_completed_bands_whole() {
        let flag = CancelFlag::new();
        let plan = ChunkPlan::new(4, 64, 1);
        let mut out = vec![0u8; 256];
        let res: Result<Count> = process_row_chunks(&mut out, plan, Some(&flag), |first_row, band| {
            band.fill(1);
            if first_row == 0 {
                flag.cancel();
            }
            Ok(Count(1))
        });
        match res {
            Err(Error::Cancelled { completed_chunks, total_chunks }) => {
                assert_eq!(total_chunks, 64);
                assert!(completed_chunks >= 1);
                assert_eq!(out.iter().filter(|&&v| v == 1).count(), completed_chunks * 4);
            }
            // Every band may have passed its check before the flag flipped.
            Ok(count) => assert_eq!(count.0, 64),
            Err(other) => panic!("unexpected error {other:?}"),
        }
        for band in out.chunks(4) {
            assert!(band.iter().all(|&v| v == band[0]), "partially written band {band:?}");
        }
    }
}
