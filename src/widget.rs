use data::SmaPoint;
use feed::Bar;

/// Sink for merged chart state. The actual charting surface lives
/// outside this process; implementations adapt whatever renders the
/// candles and report the viewport back.
pub trait RenderWidget {
    /// Tears down and recreates the candlestick and SMA series pair.
    fn reset_series(&mut self);

    /// Replaces the full contents of both series.
    fn set_data(&mut self, bars: &[Bar], sma: &[SmaPoint]);

    /// Applies one live bar and, when one exists for its timestamp, the
    /// matching SMA point.
    fn update_bar(&mut self, bar: &Bar, sma: Option<&SmaPoint>);

    /// How many bars sit left of the visible range, if the surface
    /// exposes a viewport. `None` disables backward-extension prefetch.
    fn bars_before(&self) -> Option<f64>;
}

/// Headless widget that logs state changes instead of drawing them.
#[derive(Debug, Default)]
pub struct LogWidget;

impl RenderWidget for LogWidget {
    fn reset_series(&mut self) {
        log::debug!("Chart series reset");
    }

    fn set_data(&mut self, bars: &[Bar], sma: &[SmaPoint]) {
        log::info!("Chart redraw: {} bars, {} sma points", bars.len(), sma.len());
    }

    fn update_bar(&mut self, bar: &Bar, _sma: Option<&SmaPoint>) {
        log::debug!("Live bar at {}: close {}", bar.time, bar.close);
    }

    fn bars_before(&self) -> Option<f64> {
        None
    }
}
