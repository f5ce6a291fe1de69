use crate::adapter::BackendAdapter;
use tc_types::{StoreError, StoreLocation, TimeRange};

/// Removes all rows of the ticker inside the inclusive `range` and returns how many went.
///
/// Engines without a native delete get read-all, exclude, replace-ticker. The rewrite
/// goes through the adapter's atomic ticker replace, so a failure leaves the stored
/// series as it was and other tickers of the table are never rewritten.
pub fn delete_range<A: BackendAdapter + ?Sized>(
    adapter: &A,
    loc: &StoreLocation,
    range: &TimeRange,
) -> Result<usize, StoreError> {
    if adapter.capabilities().native_range_delete {
        let removed = adapter.delete_range_native(loc, range)?;
        tracing::info!(location=%loc, %range, removed, "native range delete");
        return Ok(removed);
    }

    let existing = adapter.read(loc, None)?;
    let kept = existing.excluding(range);
    let removed = existing.len() - kept.len();
    if removed == 0 {
        tracing::debug!(location=%loc, %range, "range delete: nothing stored in range");
        return Ok(0);
    }
    adapter.replace_ticker(loc, &kept)?;
    tracing::info!(location=%loc, %range, removed, kept=kept.len(), "range delete by rewrite");
    Ok(removed)
}
