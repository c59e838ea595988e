use data::{BarStore, Period, SyncConfig, period::step_back_ms};
use feed::{
    Bar, Event, FeedError, Market, Subscription,
    fetcher::{FetchRange, InFlight},
    resilience, rest, stream,
};
use tokio::{sync::mpsc, time::Sleep};

use std::{future, pin::Pin, time::Duration};

use crate::widget::RenderWidget;

/// Commands a running sync session accepts from its host.
#[derive(Debug, Clone)]
pub enum SyncCommand {
    SelectPeriod(Period),
    SelectSymbol(Market),
    ViewportChanged,
}

/// Inputs the controller reacts to, one at a time.
#[derive(Debug)]
pub enum Message {
    PeriodSelected(Period),
    SymbolSelected(Market),
    ViewportChanged,
    DebounceElapsed,
    FetchCompleted {
        market: Market,
        period: Period,
        range: FetchRange,
        result: Result<Vec<Bar>, FeedError>,
    },
    Feed(Event),
}

impl From<SyncCommand> for Message {
    fn from(command: SyncCommand) -> Self {
        match command {
            SyncCommand::SelectPeriod(period) => Message::PeriodSelected(period),
            SyncCommand::SelectSymbol(market) => Message::SymbolSelected(market),
            SyncCommand::ViewportChanged => Message::ViewportChanged,
        }
    }
}

/// Side effects the event loop carries out after an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Fetch {
        market: Market,
        period: Period,
        range: FetchRange,
    },
    Switch(Subscription),
    ScheduleDebounce,
}

/// Chart-state controller: reacts to period and symbol selection,
/// viewport scrolls, fetch completions, and live feed events. Owns the
/// bar store and pushes merged state to the widget.
pub struct ViewSync<W> {
    widget: W,
    store: BarStore,
    market: Market,
    period: Period,
    in_flight: InFlight,
    hold: bool,
    debounce_pending: bool,
    prefetch_threshold: f64,
}

impl<W: RenderWidget> ViewSync<W> {
    pub fn new(config: &SyncConfig, widget: W) -> Self {
        Self {
            widget,
            store: BarStore::new(config.sma_lookback),
            market: config.market.clone(),
            period: Period::H1,
            in_flight: InFlight::default(),
            hold: false,
            debounce_pending: false,
            prefetch_threshold: config.prefetch_threshold,
        }
    }

    pub fn update(&mut self, message: Message, now_ms: u64) -> Vec<Action> {
        match message {
            Message::PeriodSelected(period) => self.select_period(period, now_ms),
            Message::SymbolSelected(market) => self.select_symbol(market, now_ms),
            Message::ViewportChanged => self.viewport_changed(),
            Message::DebounceElapsed => self.debounce_elapsed(),
            Message::FetchCompleted {
                market,
                period,
                range,
                result,
            } => self.fetch_completed(market, period, range, result),
            Message::Feed(event) => self.feed_event(event),
        }
    }

    /// Rebuilds the widget series for `period` and dispatches exactly one
    /// fetch plus one stream (re)subscribe. A cached series is redrawn
    /// immediately and only caught up from its tail; an uncached period
    /// gets a server-sized fresh fill.
    fn select_period(&mut self, period: Period, now_ms: u64) -> Vec<Action> {
        self.period = period;
        self.hold = true;
        self.widget.reset_series();

        let interval = period.interval();
        let cached = self.store.series(period).and_then(|series| {
            series
                .latest_timestamp()
                .map(|last| (series.to_vec(), last))
        });

        let range = match cached {
            Some((bars, last_secs)) => {
                self.widget.set_data(&bars, self.store.sma(period));
                FetchRange::CatchUp {
                    start: last_secs * 1_000 + interval.to_milliseconds(),
                    end: now_ms,
                }
            }
            None => FetchRange::Fill { end: now_ms },
        };

        self.in_flight.dispatch();
        vec![
            Action::Fetch {
                market: self.market.clone(),
                period,
                range,
            },
            Action::Switch(Subscription {
                market: self.market.clone(),
                interval,
            }),
        ]
    }

    /// Full reset: drops every cached series, then reloads the current
    /// period under the new symbol. Results of fetches dispatched for
    /// the old symbol are discarded on completion, but their in-flight
    /// counts still drain through `fetch_completed`.
    fn select_symbol(&mut self, market: Market, now_ms: u64) -> Vec<Action> {
        log::info!("Switching symbol to {market}");
        self.market = market;
        self.store.clear();
        self.select_period(self.period, now_ms)
    }

    fn viewport_changed(&mut self) -> Vec<Action> {
        if self.debounce_pending {
            return Vec::new();
        }
        self.debounce_pending = true;
        vec![Action::ScheduleDebounce]
    }

    /// Near-left-edge check after the debounce window: when the viewport
    /// runs short of bars and nothing is in flight, requests one window
    /// of older bars immediately preceding the earliest cached one. Live
    /// updates are held until that merge lands.
    fn debounce_elapsed(&mut self) -> Vec<Action> {
        self.debounce_pending = false;

        let Some(bars_before) = self.widget.bars_before() else {
            return Vec::new();
        };
        if bars_before >= self.prefetch_threshold || !self.in_flight.is_idle() {
            return Vec::new();
        }
        let Some(earliest_secs) = self
            .store
            .series(self.period)
            .and_then(|series| series.earliest_timestamp())
        else {
            return Vec::new();
        };

        let step = step_back_ms(self.period.interval());
        let end = earliest_secs as i64 * 1_000 + step;
        let start = end + step * self.period.window_size() as i64;
        if end <= 0 {
            return Vec::new();
        }

        self.hold = true;
        self.in_flight.dispatch();
        vec![Action::Fetch {
            market: self.market.clone(),
            period: self.period,
            range: FetchRange::Backfill {
                start: start.max(0) as u64,
                end: end as u64,
            },
        }]
    }

    /// Merges a completed fetch (stale-symbol results are dropped) and
    /// releases the live-update hold once the last outstanding fetch has
    /// drained.
    fn fetch_completed(
        &mut self,
        market: Market,
        period: Period,
        range: FetchRange,
        result: Result<Vec<Bar>, FeedError>,
    ) -> Vec<Action> {
        if market == self.market {
            match result {
                Ok(bars) if bars.is_empty() => {
                    log::info!("No new bars for {market} {period}");
                }
                Ok(bars) => {
                    self.store
                        .merge_historical(period, &bars, range.is_historical());
                    if period == self.period {
                        if let Some(series) = self.store.series(period) {
                            let bars = series.to_vec();
                            self.widget.set_data(&bars, self.store.sma(period));
                        }
                    }
                }
                Err(e) => {
                    log::error!("Fetch failed for {market} {period}: {e}");
                }
            }
        } else {
            log::debug!("Dropping fetch result for stale symbol {market}");
        }

        self.in_flight.complete();
        if self.in_flight.is_idle() {
            self.hold = false;
        }
        Vec::new()
    }

    /// Applies live feed events. Bars are gated on the hold flag, the
    /// period's historical mark, and price completeness; the freshly
    /// patched SMA point rides along when its timestamp lines up.
    fn feed_event(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::Connected => log::info!("Bar stream connected"),
            Event::Disconnected(reason) => {
                log::warn!("Bar stream disconnected: {reason}");
            }
            Event::BarReceived(live) => {
                if self.hold || !self.store.is_historical(self.period) {
                    return Vec::new();
                }
                let Some(bar) = live.complete() else {
                    return Vec::new();
                };
                if self.store.append_live(self.period, bar) {
                    let sma = self
                        .store
                        .sma(self.period)
                        .last()
                        .filter(|point| point.time == bar.time);
                    self.widget.update_bar(&bar, sma);
                }
            }
        }
        Vec::new()
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

async fn wait_for(debounce: &mut Option<Pin<Box<Sleep>>>) {
    match debounce.as_mut() {
        Some(sleep) => sleep.await,
        None => future::pending().await,
    }
}

/// Drives one sync session: spawns the stream task, dispatches fetches,
/// and funnels every completion and feed event through the controller,
/// until the command channel closes.
pub async fn run<W>(config: SyncConfig, widget: W, mut commands: mpsc::Receiver<SyncCommand>)
where
    W: RenderWidget + Send + 'static,
{
    let client = reqwest::Client::new();
    let http_base = config.http_base.clone();
    let debounce_window = Duration::from_millis(config.debounce_ms);

    let (stream_tx, stream_rx) = mpsc::channel(16);
    let (event_tx, mut event_rx) = mpsc::channel(100);
    let ws_url = format!("{}/api/ohlcvs", config.ws_base);
    let policy = resilience::reconnect_policy(Duration::from_millis(config.reconnect_delay_ms));
    tokio::spawn(stream::run(ws_url, policy, stream_rx, event_tx));

    let (done_tx, mut done_rx) = mpsc::channel::<Message>(16);
    let mut debounce: Option<Pin<Box<Sleep>>> = None;

    let mut state = ViewSync::new(&config, widget);

    // One-shot check that the configured symbol is actually served.
    {
        let client = client.clone();
        let http_base = http_base.clone();
        let market = config.market.clone();
        tokio::spawn(async move {
            match rest::fetch_symbols(&client, &http_base).await {
                Ok(symbols) if !symbols.contains(&market) => {
                    log::warn!(
                        "{market} is not in the server's symbol list ({} available)",
                        symbols.len()
                    );
                }
                Ok(_) => {}
                Err(e) => log::warn!("Failed to list symbols: {e}"),
            }
        });
    }

    loop {
        let actions = tokio::select! {
            command = commands.recv() => match command {
                Some(command) => state.update(command.into(), now_ms()),
                None => break,
            },
            Some(message) = done_rx.recv() => state.update(message, now_ms()),
            Some(event) = event_rx.recv() => state.update(Message::Feed(event), now_ms()),
            _ = wait_for(&mut debounce) => {
                debounce = None;
                state.update(Message::DebounceElapsed, now_ms())
            }
        };

        for action in actions {
            match action {
                Action::Fetch {
                    market,
                    period,
                    range,
                } => {
                    let client = client.clone();
                    let http_base = http_base.clone();
                    let done = done_tx.clone();
                    let interval = period.interval();
                    tokio::spawn(async move {
                        let result =
                            rest::fetch_bars(&client, &http_base, &market, interval, range).await;
                        let _ = done
                            .send(Message::FetchCompleted {
                                market,
                                period,
                                range,
                                result,
                            })
                            .await;
                    });
                }
                Action::Switch(subscription) => {
                    if stream_tx
                        .send(stream::Command::Switch(subscription))
                        .await
                        .is_err()
                    {
                        log::error!("Bar stream task has stopped");
                    }
                }
                Action::ScheduleDebounce => {
                    debounce = Some(Box::pin(tokio::time::sleep(debounce_window)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data::SmaPoint;
    use feed::{Interval, LiveBar};

    #[derive(Default)]
    struct TestWidget {
        resets: usize,
        redraws: Vec<(usize, usize)>,
        live_bars: Vec<u64>,
        live_sma: Vec<Option<SmaPoint>>,
        bars_before: Option<f64>,
    }

    impl RenderWidget for TestWidget {
        fn reset_series(&mut self) {
            self.resets += 1;
        }

        fn set_data(&mut self, bars: &[Bar], sma: &[SmaPoint]) {
            self.redraws.push((bars.len(), sma.len()));
        }

        fn update_bar(&mut self, bar: &Bar, sma: Option<&SmaPoint>) {
            self.live_bars.push(bar.time);
            self.live_sma.push(sma.copied());
        }

        fn bars_before(&self) -> Option<f64> {
            self.bars_before
        }
    }

    const NOW_MS: u64 = 1_625_616_000_000;

    fn controller() -> ViewSync<TestWidget> {
        let config = SyncConfig {
            sma_lookback: 2,
            ..SyncConfig::default()
        };
        ViewSync::new(&config, TestWidget::default())
    }

    fn bar(time: u64, close: f64) -> Bar {
        Bar {
            time,
            open: close,
            high: close,
            low: close,
            close,
            volume: None,
        }
    }

    fn live(time: u64, close: f64) -> LiveBar {
        LiveBar {
            time,
            open: Some(close),
            high: Some(close),
            low: Some(close),
            close: Some(close),
            volume: None,
        }
    }

    fn complete(
        sync: &mut ViewSync<TestWidget>,
        period: Period,
        bars: Vec<Bar>,
        range: FetchRange,
    ) {
        let market = sync.market.clone();
        sync.update(
            Message::FetchCompleted {
                market,
                period,
                range,
                result: Ok(bars),
            },
            NOW_MS,
        );
    }

    #[test]
    fn fresh_period_dispatches_fill_and_subscribe() {
        let mut sync = controller();

        let actions = sync.update(Message::PeriodSelected(Period::H1), NOW_MS);

        assert_eq!(
            actions,
            vec![
                Action::Fetch {
                    market: sync.market.clone(),
                    period: Period::H1,
                    range: FetchRange::Fill { end: NOW_MS },
                },
                Action::Switch(Subscription {
                    market: sync.market.clone(),
                    interval: Interval::M1,
                }),
            ]
        );
        assert!(sync.hold);
        assert_eq!(sync.in_flight.count(), 1);
        assert_eq!(sync.widget.resets, 1);
    }

    #[test]
    fn cached_period_redraws_then_catches_up() {
        let mut sync = controller();
        sync.update(Message::PeriodSelected(Period::H1), NOW_MS);
        complete(
            &mut sync,
            Period::H1,
            vec![bar(100, 10.0), bar(160, 20.0)],
            FetchRange::Fill { end: NOW_MS },
        );
        assert!(!sync.hold);

        let actions = sync.update(Message::PeriodSelected(Period::H1), NOW_MS);

        match &actions[0] {
            Action::Fetch { range, .. } => assert_eq!(
                *range,
                FetchRange::CatchUp {
                    start: 160 * 1_000 + 60_000,
                    end: NOW_MS,
                }
            ),
            other => panic!("expected fetch, got {other:?}"),
        }
        // Cached bars went straight back to the widget before the fetch.
        assert_eq!(sync.widget.redraws.last(), Some(&(2, 1)));
    }

    #[test]
    fn viewport_changes_are_debounced_single_flight() {
        let mut sync = controller();

        assert_eq!(
            sync.update(Message::ViewportChanged, NOW_MS),
            vec![Action::ScheduleDebounce]
        );
        // A second scroll while the timer is pending is a no-op.
        assert!(sync.update(Message::ViewportChanged, NOW_MS).is_empty());
    }

    #[test]
    fn near_edge_triggers_one_backfill_with_exact_window() {
        let mut sync = controller();
        sync.update(Message::PeriodSelected(Period::H1), NOW_MS);
        complete(
            &mut sync,
            Period::H1,
            vec![bar(1_625_612_400, 10.0), bar(1_625_612_460, 11.0)],
            FetchRange::Fill { end: NOW_MS },
        );
        sync.widget.bars_before = Some(10.0);

        sync.update(Message::ViewportChanged, NOW_MS);
        let actions = sync.update(Message::DebounceElapsed, NOW_MS);

        // One 1m interval before the earliest bar, then 60 more back.
        assert_eq!(
            actions,
            vec![Action::Fetch {
                market: sync.market.clone(),
                period: Period::H1,
                range: FetchRange::Backfill {
                    start: 1_625_608_740_000,
                    end: 1_625_612_340_000,
                },
            }]
        );

        // A second pass while that fetch is outstanding is suppressed.
        sync.update(Message::ViewportChanged, NOW_MS);
        assert!(sync.update(Message::DebounceElapsed, NOW_MS).is_empty());
    }

    #[test]
    fn far_from_edge_requests_nothing() {
        let mut sync = controller();
        sync.update(Message::PeriodSelected(Period::H1), NOW_MS);
        complete(
            &mut sync,
            Period::H1,
            vec![bar(1_625_612_400, 10.0)],
            FetchRange::Fill { end: NOW_MS },
        );
        sync.widget.bars_before = Some(500.0);

        sync.update(Message::ViewportChanged, NOW_MS);

        assert!(sync.update(Message::DebounceElapsed, NOW_MS).is_empty());
    }

    #[test]
    fn hold_clears_only_after_last_completion() {
        let mut sync = controller();
        sync.update(Message::PeriodSelected(Period::H1), NOW_MS);
        sync.update(Message::PeriodSelected(Period::D1), NOW_MS);
        assert_eq!(sync.in_flight.count(), 2);

        complete(
            &mut sync,
            Period::H1,
            vec![bar(1_625_612_400, 10.0)],
            FetchRange::Fill { end: NOW_MS },
        );
        assert!(sync.hold);

        complete(
            &mut sync,
            Period::D1,
            vec![bar(1_625_612_400, 10.0)],
            FetchRange::Fill { end: NOW_MS },
        );
        assert!(!sync.hold);
    }

    #[test]
    fn live_bars_gated_by_hold_then_applied() {
        let mut sync = controller();
        sync.update(Message::PeriodSelected(Period::H1), NOW_MS);

        // Hold is up while the fill is outstanding.
        sync.update(
            Message::Feed(Event::BarReceived(live(200, 11.0))),
            NOW_MS,
        );
        assert!(sync.widget.live_bars.is_empty());

        complete(
            &mut sync,
            Period::H1,
            vec![bar(60, 10.0), bar(120, 12.0)],
            FetchRange::Fill { end: NOW_MS },
        );

        sync.update(
            Message::Feed(Event::BarReceived(live(180, 11.0))),
            NOW_MS,
        );
        assert_eq!(sync.widget.live_bars, vec![180]);
        assert_eq!(
            sync.store.series(Period::H1).map(|series| series.len()),
            Some(3)
        );
    }

    #[test]
    fn live_bars_held_while_backfill_outstanding() {
        let mut sync = controller();
        sync.update(Message::PeriodSelected(Period::H1), NOW_MS);
        complete(
            &mut sync,
            Period::H1,
            vec![bar(1_625_612_400, 10.0), bar(1_625_612_460, 11.0)],
            FetchRange::Fill { end: NOW_MS },
        );
        sync.widget.bars_before = Some(10.0);

        sync.update(Message::ViewportChanged, NOW_MS);
        assert_eq!(sync.update(Message::DebounceElapsed, NOW_MS).len(), 1);
        assert!(sync.hold);

        // A backfill merge is pending, the live bar must not draw yet.
        sync.update(
            Message::Feed(Event::BarReceived(live(1_625_612_520, 12.0))),
            NOW_MS,
        );
        assert!(sync.widget.live_bars.is_empty());

        complete(
            &mut sync,
            Period::H1,
            vec![bar(1_625_608_740, 9.0)],
            FetchRange::Backfill {
                start: 1_625_608_740_000,
                end: 1_625_612_340_000,
            },
        );
        assert!(!sync.hold);

        sync.update(
            Message::Feed(Event::BarReceived(live(1_625_612_520, 12.0))),
            NOW_MS,
        );
        assert_eq!(sync.widget.live_bars, vec![1_625_612_520]);
    }

    #[test]
    fn live_update_carries_matching_sma_point() {
        let mut sync = controller();
        sync.update(Message::PeriodSelected(Period::H1), NOW_MS);
        complete(
            &mut sync,
            Period::H1,
            vec![bar(60, 10.0), bar(120, 12.0)],
            FetchRange::Fill { end: NOW_MS },
        );

        sync.update(
            Message::Feed(Event::BarReceived(live(180, 11.0))),
            NOW_MS,
        );

        assert_eq!(
            sync.widget.live_sma.last(),
            Some(&Some(SmaPoint {
                time: 180,
                value: 12.0,
            }))
        );
    }

    #[test]
    fn live_bars_blocked_after_non_historical_merge() {
        let mut sync = controller();
        sync.update(Message::PeriodSelected(Period::H1), NOW_MS);
        complete(
            &mut sync,
            Period::H1,
            vec![bar(60, 10.0)],
            FetchRange::CatchUp {
                start: 0,
                end: NOW_MS,
            },
        );

        sync.update(
            Message::Feed(Event::BarReceived(live(120, 11.0))),
            NOW_MS,
        );

        assert!(sync.widget.live_bars.is_empty());
    }

    #[test]
    fn warm_up_bars_with_null_prices_are_dropped() {
        let mut sync = controller();
        sync.update(Message::PeriodSelected(Period::H1), NOW_MS);
        complete(
            &mut sync,
            Period::H1,
            vec![bar(60, 10.0)],
            FetchRange::Fill { end: NOW_MS },
        );

        let warm_up = LiveBar {
            time: 120,
            open: None,
            high: Some(10.0),
            low: Some(9.0),
            close: Some(9.5),
            volume: None,
        };
        sync.update(Message::Feed(Event::BarReceived(warm_up)), NOW_MS);

        assert!(sync.widget.live_bars.is_empty());
    }

    #[test]
    fn stale_symbol_results_are_discarded() {
        let mut sync = controller();
        sync.update(Message::PeriodSelected(Period::H1), NOW_MS);
        let old_market = sync.market.clone();

        sync.update(
            Message::SymbolSelected(Market::new("bitfinex", "eth", "usd")),
            NOW_MS,
        );
        assert_eq!(sync.in_flight.count(), 2);

        sync.update(
            Message::FetchCompleted {
                market: old_market,
                period: Period::H1,
                range: FetchRange::Fill { end: NOW_MS },
                result: Ok(vec![bar(60, 10.0)]),
            },
            NOW_MS,
        );

        assert!(sync.store.series(Period::H1).is_none());
        // The new symbol's fill is still outstanding.
        assert!(sync.hold);
        assert_eq!(sync.in_flight.count(), 1);
    }

    #[test]
    fn failed_and_empty_results_leave_the_series_alone() {
        let mut sync = controller();
        sync.update(Message::PeriodSelected(Period::H1), NOW_MS);
        complete(
            &mut sync,
            Period::H1,
            vec![bar(60, 10.0), bar(120, 12.0)],
            FetchRange::Fill { end: NOW_MS },
        );

        let market = sync.market.clone();
        sync.update(
            Message::FetchCompleted {
                market: market.clone(),
                period: Period::H1,
                range: FetchRange::CatchUp {
                    start: 0,
                    end: NOW_MS,
                },
                result: Ok(Vec::new()),
            },
            NOW_MS,
        );
        // An empty catch-up does not touch the historical mark either.
        assert!(sync.store.is_historical(Period::H1));

        sync.update(
            Message::FetchCompleted {
                market,
                period: Period::H1,
                range: FetchRange::Backfill {
                    start: 0,
                    end: 60_000,
                },
                result: Err(FeedError::ParseError("bad payload".to_string())),
            },
            NOW_MS,
        );

        assert_eq!(
            sync.store.series(Period::H1).map(|series| series.len()),
            Some(2)
        );
    }
}
