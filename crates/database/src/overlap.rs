use crate::adapter::BackendAdapter;
use tc_types::{StoreError, StoreLocation, TickSeries, TimeRange};

/// Stored and incoming spans of a refused append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    pub stored: TimeRange,
    pub incoming: TimeRange,
}

/// Compares the incoming span with the stored `[min, max]` of the ticker.
///
/// Only the outer bounds are consulted: a gap inside the stored span still counts as
/// occupied. Empty input never overlaps.
pub fn detect<A: BackendAdapter + ?Sized>(
    adapter: &A,
    loc: &StoreLocation,
    incoming: &TickSeries,
) -> Result<Option<Overlap>, StoreError> {
    let Some(incoming) = incoming.extent() else {
        return Ok(None);
    };
    let Some(stored) = adapter.extent(loc)? else {
        return Ok(None);
    };
    let stored = stored.range();
    Ok(stored
        .overlaps(&incoming)
        .then_some(Overlap { stored, incoming }))
}

pub fn ensure_disjoint<A: BackendAdapter + ?Sized>(
    adapter: &A,
    loc: &StoreLocation,
    incoming: &TickSeries,
) -> Result<(), StoreError> {
    match detect(adapter, loc, incoming)? {
        None => Ok(()),
        Some(Overlap { stored, incoming }) => {
            tracing::warn!(location=%loc, %stored, %incoming, "append refused: overlapping range");
            Err(StoreError::Overlap {
                location: loc.clone(),
                stored,
                incoming,
            })
        }
    }
}
