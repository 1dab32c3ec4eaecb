//! Roster partitioning
//!
//! Splits a roster into at most `n` contiguous chunks of `ceil(len / n)`
//! people. Empty trailing chunks are dropped, so fewer than `n` workers may
//! be used. The split depends only on its inputs.

use crate::error::BatchError;

/// Split `roster` into at most `n` order-preserving chunks
///
/// # Errors
/// - `BatchError::InvalidWorkerCount` if `n` is zero
pub fn partition<T: Clone>(roster: &[T], n: usize) -> Result<Vec<Vec<T>>, BatchError> {
    if n == 0 {
        return Err(BatchError::InvalidWorkerCount(n));
    }
    if roster.is_empty() {
        return Ok(Vec::new());
    }

    let size = roster.len().div_ceil(n);
    Ok(roster.chunks(size).map(<[T]>::to_vec).collect())
}
