/// A bounded request for historical bars. Bounds are unix milliseconds;
/// the server converts them to timestamps on its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRange {
    /// First load of a period. No `start`, the server picks how far back
    /// its default window reaches from `end`.
    Fill { end: u64 },
    /// Extends a cached series forward from one interval past its tail.
    CatchUp { start: u64, end: u64 },
    /// Extends the series backward from one interval before its head.
    Backfill { start: u64, end: u64 },
}

impl FetchRange {
    pub fn bounds(&self) -> (Option<u64>, u64) {
        match *self {
            FetchRange::Fill { end } => (None, end),
            FetchRange::CatchUp { start, end } | FetchRange::Backfill { start, end } => {
                (Some(start), end)
            }
        }
    }

    /// Whether a merge of this range's result marks the period as fully
    /// loaded. Catch-up extends a tail that may still be short of "now",
    /// so it does not.
    pub fn is_historical(&self) -> bool {
        matches!(self, FetchRange::Fill { .. } | FetchRange::Backfill { .. })
    }
}

/// Counts fetches that have been dispatched but not yet completed.
///
/// Backfills stay suppressed while any fetch is outstanding, and the
/// live-update hold is only released once the count returns to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InFlight(usize);

impl InFlight {
    pub fn dispatch(&mut self) {
        self.0 += 1;
    }

    pub fn complete(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }

    pub fn is_idle(&self) -> bool {
        self.0 == 0
    }

    pub fn count(&self) -> usize {
        self.0
    }
}
