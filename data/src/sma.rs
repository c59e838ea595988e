use feed::Bar;

/// One moving-average point, plotted under the bar whose timestamp it
/// shares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmaPoint {
    pub time: u64,
    pub value: f64,
}

/// Recomputes the full SMA series.
///
/// The window for the point at index `i` is the `lookback - 1` closes
/// strictly before bar `i`, not the conventional trailing window that
/// would include it. Intentional: the overlay has always plotted this
/// variant and downstream charts expect it.
pub fn derive(bars: &[Bar], lookback: usize) -> Vec<SmaPoint> {
    if lookback < 2 || bars.len() < lookback {
        return Vec::new();
    }

    (lookback - 1..bars.len())
        .map(|i| point_at(bars, lookback, i))
        .collect()
}

/// Patches the tail after a live append or replace: recomputes only the
/// newest point and overwrites it when its timestamp is already plotted.
pub fn patch_latest(bars: &[Bar], lookback: usize, sma: &mut Vec<SmaPoint>) {
    if lookback < 2 || bars.len() < lookback {
        return;
    }

    let point = point_at(bars, lookback, bars.len() - 1);
    match sma.last_mut() {
        Some(last) if last.time == point.time => *last = point,
        _ => sma.push(point),
    }
}

fn point_at(bars: &[Bar], lookback: usize, i: usize) -> SmaPoint {
    let window = &bars[i + 1 - lookback..i];
    let sum: f64 = window.iter().map(|bar| bar.close).sum();

    SmaPoint {
        time: bars[i].time,
        value: sum / window.len() as f64,
    }
}
