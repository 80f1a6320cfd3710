use crate::{OrchestratorError, Result};

/// Split `items` into ordered, contiguous batches of at most `max_size`.
///
/// Concatenating the batches yields `items` again; only the last batch may be
/// short, and an empty input produces no batches.
pub fn split_into_batches<T: Clone>(items: &[T], max_size: usize) -> Result<Vec<Vec<T>>> {
    if max_size == 0 {
        return Err(OrchestratorError::InvalidInput(
            "batch size must be greater than 0".to_string(),
        ));
    }

    Ok(items.chunks(max_size).map(|chunk| chunk.to_vec()).collect())
}
