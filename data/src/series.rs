use std::collections::{BTreeMap, HashMap};

use feed::Bar;

use crate::{
    Period,
    sma::{self, SmaPoint},
};

/// Bars for one period's series, keyed by open time in unix seconds.
/// The map keeps the series sorted and free of duplicate timestamps.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    bars: BTreeMap<u64, Bar>,
}

impl BarSeries {
    /// Merges a fetch result. A bar whose timestamp is already present
    /// overwrites the earlier one.
    pub fn merge(&mut self, bars: &[Bar]) {
        for bar in bars {
            self.bars.insert(bar.time, *bar);
        }
    }

    /// Applies one live bar: appends when newer than the tail, replaces
    /// the tail on an equal timestamp, drops anything older.
    pub fn append_or_replace_latest(&mut self, bar: Bar) -> bool {
        if let Some(last) = self.latest_timestamp() {
            if bar.time < last {
                return false;
            }
        }
        self.bars.insert(bar.time, bar);
        true
    }

    pub fn latest_timestamp(&self) -> Option<u64> {
        self.bars.last_key_value().map(|(time, _)| *time)
    }

    pub fn earliest_timestamp(&self) -> Option<u64> {
        self.bars.first_key_value().map(|(time, _)| *time)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Bars in ascending time order.
    pub fn to_vec(&self) -> Vec<Bar> {
        self.bars.values().copied().collect()
    }
}

#[derive(Debug, Clone, Default)]
struct PeriodData {
    series: BarSeries,
    sma: Vec<SmaPoint>,
    historical: bool,
}

/// Per-period cache of merged bars with their SMA overlay and load state.
/// A period stays absent until its first non-empty fetch lands.
#[derive(Debug)]
pub struct BarStore {
    periods: HashMap<Period, PeriodData>,
    sma_lookback: usize,
}

impl BarStore {
    pub fn new(sma_lookback: usize) -> Self {
        Self {
            periods: HashMap::new(),
            sma_lookback,
        }
    }

    pub fn series(&self, period: Period) -> Option<&BarSeries> {
        self.periods.get(&period).map(|data| &data.series)
    }

    /// Merges a completed fetch and recomputes the SMA wholesale. The
    /// period's historical flag takes the fetch's mark: fresh fills and
    /// backward extensions set it, catch-ups clear it. Empty results
    /// leave the store untouched.
    pub fn merge_historical(&mut self, period: Period, bars: &[Bar], historical: bool) {
        if bars.is_empty() {
            return;
        }

        let data = self.periods.entry(period).or_default();
        data.series.merge(bars);
        data.sma = sma::derive(&data.series.to_vec(), self.sma_lookback);
        data.historical = historical;
    }

    /// Applies one live bar to an already-loaded period, patching the SMA
    /// tail. Returns whether the series changed.
    pub fn append_live(&mut self, period: Period, bar: Bar) -> bool {
        let Some(data) = self.periods.get_mut(&period) else {
            return false;
        };
        if !data.series.append_or_replace_latest(bar) {
            return false;
        }

        sma::patch_latest(&data.series.to_vec(), self.sma_lookback, &mut data.sma);
        true
    }

    pub fn is_historical(&self, period: Period) -> bool {
        self.periods
            .get(&period)
            .is_some_and(|data| data.historical)
    }

    pub fn sma(&self, period: Period) -> &[SmaPoint] {
        self.periods
            .get(&period)
            .map_or(&[], |data| data.sma.as_slice())
    }

    /// Drops every cached period, for a full reset on symbol change.
    pub fn clear(&mut self) {
        self.periods.clear();
    }
}
