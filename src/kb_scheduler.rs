// Poll + countdown timers for the live board
//
// Everything runs on one task: a poll and a tick can interleave but never
// overlap. The tick interval only exists while the registry has live rows
// and is always dropped before a replacement is created.

use crate::kb_client::ArrivalFeed;
use crate::kb_clock::TimeSource;
use crate::kb_models::{DashboardPayload, DirectionGroup, KBError};
use crate::kb_registry::{LiveCountdownRegistry, TickReport};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

pub const TICK_PERIOD: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_SECS: i64 = 10;

/// Longest accepted poll period, one day.
pub const MAX_POLL_SECS: i64 = 86_400;

/// Receives everything the core computes. Implementations own all output.
pub trait Presenter {
    /// Full redraw after a successful poll.
    fn render_board(
        &mut self,
        payload: &DashboardPayload,
        registry: &LiveCountdownRegistry,
        now: DateTime<Utc>,
    );

    /// Per-second countdown changes, keyed by `(group, index)`.
    fn apply_tick(
        &mut self,
        report: &TickReport,
        registry: &LiveCountdownRegistry,
        now: DateTime<Utc>,
    );

    /// Degraded state after a failed poll. Ticking has already stopped.
    fn show_error(&mut self, error: &KBError, now: DateTime<Utc>);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub polls_ok: u64,
    pub polls_failed: u64,
    pub ticks: u64,
}

/// Converts the configured poll period; zero or negative disables recurring polls.
pub fn poll_period(seconds: i64) -> Option<Duration> {
    if seconds > 0 {
        Some(Duration::from_secs(seconds as u64))
    } else {
        None
    }
}

pub struct RefreshScheduler<F, P, C> {
    feed: F,
    presenter: P,
    clock: C,
    direction: DirectionGroup,
    poll_every: Option<Duration>,
    registry: LiveCountdownRegistry,
    ticker: Option<Interval>,
    stats: SchedulerStats,
}

impl<F, P, C> RefreshScheduler<F, P, C>
where
    F: ArrivalFeed,
    P: Presenter,
    C: TimeSource,
{
    pub fn new(
        feed: F,
        presenter: P,
        clock: C,
        direction: DirectionGroup,
        poll_every: Option<Duration>,
        registry: LiveCountdownRegistry,
    ) -> Self {
        RefreshScheduler {
            feed,
            presenter,
            clock,
            direction,
            poll_every,
            registry,
            ticker: None,
            stats: SchedulerStats::default(),
        }
    }

    pub fn registry(&self) -> &LiveCountdownRegistry {
        &self.registry
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    /// Fire the first poll immediately, then run both timers until `shutdown` resolves.
    pub async fn run_until<S>(&mut self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        self.poll_once().await;

        let mut poller = self.poll_every.map(|period| {
            let mut poller = interval_at(Instant::now() + period, period);
            poller.set_missed_tick_behavior(MissedTickBehavior::Skip);
            poller
        });
        if poller.is_none() {
            info!("Recurring polls disabled; showing a single snapshot");
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutting down scheduler");
                    break;
                }
                _ = next_tick(&mut poller) => self.poll_once().await,
                _ = next_tick(&mut self.ticker) => self.tick_once(),
            }
        }
    }

    pub async fn poll_once(&mut self) {
        match self.feed.fetch(self.direction).await {
            Ok(payload) => self.accept_payload(payload),
            Err(e) => self.accept_failure(e),
        }
    }

    fn accept_payload(&mut self, payload: DashboardPayload) {
        self.stats.polls_ok += 1;
        self.stop_ticker();

        let now = self.clock.now();
        self.registry.replace(&payload, now);
        self.presenter.render_board(&payload, &self.registry, now);

        if self.registry.has_live_records() {
            self.start_ticker();
        }
    }

    fn accept_failure(&mut self, e: KBError) {
        self.stats.polls_failed += 1;
        error!("Poll failed: {}", e);
        self.stop_ticker();
        self.presenter.show_error(&e, self.clock.now());
    }

    pub fn tick_once(&mut self) {
        self.stats.ticks += 1;
        let now = self.clock.now();
        let report = self.registry.tick(now);
        self.presenter.apply_tick(&report, &self.registry, now);

        if report.live_remaining == 0 {
            debug!("No live countdowns left; stopping ticker");
            self.stop_ticker();
        }
    }

    fn start_ticker(&mut self) {
        let mut ticker = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
    }

    fn stop_ticker(&mut self) {
        self.ticker = None;
    }
}

async fn next_tick(ticker: &mut Option<Interval>) -> Instant {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb_clock::SystemClock;
    use crate::kb_countdown::Locale;
    use crate::kb_models::{ArrivalRecord, RenderKey, RouteDisplayData, Result};
    use crate::kb_registry::LiveState;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    struct ScriptedFeed {
        script: RefCell<VecDeque<Result<DashboardPayload>>>,
        calls: Cell<usize>,
    }

    impl ScriptedFeed {
        fn new(script: Vec<Result<DashboardPayload>>) -> Self {
            ScriptedFeed { script: RefCell::new(script.into()), calls: Cell::new(0) }
        }
    }

    impl ArrivalFeed for ScriptedFeed {
        async fn fetch(&self, _direction: DirectionGroup) -> Result<DashboardPayload> {
            self.calls.set(self.calls.get() + 1);
            self.script
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(KBError::NetworkError("script exhausted".to_string())))
        }
    }

    #[derive(Default)]
    struct RecordingPresenter {
        boards: usize,
        ticks: Vec<TickReport>,
        errors: Vec<KBError>,
    }

    impl Presenter for RecordingPresenter {
        fn render_board(&mut self, _: &DashboardPayload, _: &LiveCountdownRegistry, _: DateTime<Utc>) {
            self.boards += 1;
        }

        fn apply_tick(&mut self, report: &TickReport, _: &LiveCountdownRegistry, _: DateTime<Utc>) {
            self.ticks.push(report.clone());
        }

        fn show_error(&mut self, error: &KBError, _: DateTime<Utc>) {
            self.errors.push(error.clone());
        }
    }

    fn one_bus(secs: i64) -> DashboardPayload {
        let record = ArrivalRecord {
            seconds_until_departure: Some(secs),
            origin_stop_tag: Some("OTHER".to_string()),
            ..ArrivalRecord::default()
        };
        let route = RouteDisplayData { buses_to_display: vec![record], ..RouteDisplayData::default() };
        DashboardPayload {
            routes_bus_data: Some([("g1".to_string(), route)].into_iter().collect()),
            ..DashboardPayload::default()
        }
    }

    fn scheduler(
        script: Vec<Result<DashboardPayload>>,
        poll_secs: i64,
    ) -> RefreshScheduler<ScriptedFeed, RecordingPresenter, SystemClock> {
        RefreshScheduler::new(
            ScriptedFeed::new(script),
            RecordingPresenter::default(),
            SystemClock,
            DirectionGroup::ToStationArea,
            poll_period(poll_secs),
            LiveCountdownRegistry::new(Locale::En),
        )
    }

    async fn after(millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    #[test]
    fn test_poll_period() {
        assert_eq!(poll_period(10), Some(Duration::from_secs(10)));
        assert_eq!(poll_period(0), None);
        assert_eq!(poll_period(-5), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_countdown() {
        let mut s = scheduler(vec![Ok(one_bus(30))], 0);
        let key = RenderKey::new("g1", 0);

        s.run_until(after(16_500)).await;
        let arrival = s.registry().get(&key).unwrap();
        assert_eq!(arrival.display_seconds, 14);
        assert_eq!(arrival.countdown_text, "in 14 seconds");
        assert_eq!(s.stats().ticks, 16);

        let mut s = scheduler(vec![Ok(one_bus(30))], 0);
        s.run_until(after(40_000)).await;
        let arrival = s.registry().get(&key).unwrap();
        assert_eq!(arrival.display_seconds, -1);
        assert_eq!(arrival.state, LiveState::Departed);
        assert_eq!(arrival.countdown_text, "");
        assert_eq!(s.stats().ticks, 31);
        assert!(!s.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_polling_still_fires_once() {
        let mut s = scheduler(vec![Ok(one_bus(300)), Ok(one_bus(300))], -1);
        s.run_until(after(30_000)).await;
        assert_eq!(s.feed.calls.get(), 1);
        assert_eq!(s.presenter().boards, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_poll_replaces_registry_and_restarts_ticker() {
        let mut s = scheduler(vec![Ok(one_bus(30)), Ok(one_bus(100))], 5);
        s.run_until(after(6_500)).await;

        assert_eq!(s.stats().polls_ok, 2);
        assert_eq!(s.presenter().boards, 2);
        let arrival = s.registry().get(&RenderKey::new("g1", 0)).unwrap();
        assert_eq!(arrival.display_seconds, 99);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_stops_ticker() {
        let mut s = scheduler(vec![Ok(one_bus(300))], 5);
        s.run_until(after(7_500)).await;

        assert_eq!(s.stats().polls_ok, 1);
        assert_eq!(s.stats().polls_failed, 1);
        assert_eq!(s.stats().ticks, 4);
        assert_eq!(s.presenter().errors.len(), 1);
        assert!(!s.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_is_retried_on_schedule() {
        let mut s = scheduler(
            vec![Err(KBError::NetworkError("down".to_string())), Ok(one_bus(300))],
            5,
        );
        s.run_until(after(5_500)).await;

        assert_eq!(s.stats().polls_failed, 1);
        assert_eq!(s.stats().polls_ok, 1);
        assert!(s.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_stops_when_everything_departed() {
        let mut s = scheduler(vec![Ok(one_bus(2))], 0);
        s.run_until(after(10_000)).await;

        assert_eq!(s.stats().ticks, 3);
        let departed: usize = s.presenter().ticks.iter().map(|r| r.departed().count()).sum();
        assert_eq!(departed, 1);
        assert!(!s.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_never_ticks() {
        let mut s = scheduler(vec![Ok(DashboardPayload::default())], 0);
        s.run_until(after(5_000)).await;

        assert_eq!(s.presenter().boards, 1);
        assert_eq!(s.stats().ticks, 0);
        assert!(s.registry().is_empty());
    }
}
