// Live countdown table: one entry per displayed bus, advanced once per second
use crate::kb_countdown::{CountdownFormatter, Locale};
use crate::kb_models::{
    is_ishikura_origin, ArrivalRecord, DashboardPayload, RenderKey, ISHIKURA_URGENCY_WINDOW_SECS,
    URGENCY_WINDOW_SECS,
};
use crate::kb_status::{Status, StatusClassifier};
use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use std::collections::BTreeMap;

// ============================================================================
// Data Structures
// ============================================================================

/// What drives a row's countdown. Exactly one applies for the record's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub enum CountdownSource {
    /// Recomputed from the absolute departure time each tick.
    Timestamp(DateTime<Utc>),
    /// Decremented by one each tick from the last server sync.
    Decrement,
    /// No timing data; the text never changes.
    Static(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Scheduled,
    UrgentSoon,
    /// Terminal until the next poll replaces the registry.
    Departed,
}

#[derive(Debug, Clone)]
pub struct LiveArrival {
    pub record: ArrivalRecord,
    pub source: CountdownSource,
    pub display_seconds: i64,
    pub status: Status,
    pub state: LiveState,
    pub countdown_text: String,
    pub is_urgent: bool,
}

impl LiveArrival {
    pub fn is_live(&self) -> bool {
        self.state != LiveState::Departed && !matches!(self.source, CountdownSource::Static(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountdownUpdate {
    pub key: RenderKey,
    pub display_seconds: i64,
    pub text: String,
    pub is_urgent: bool,
    pub state: LiveState,
    /// Set only on the tick that moved the row into `Departed`.
    pub departed_now: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub updates: Vec<CountdownUpdate>,
    pub live_remaining: usize,
}

impl TickReport {
    pub fn departed(&self) -> impl Iterator<Item = &RenderKey> {
        self.updates.iter().filter(|u| u.departed_now).map(|u| &u.key)
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct LiveCountdownRegistry {
    locale: Locale,
    groups: BTreeMap<String, Vec<LiveArrival>>,
}

impl LiveCountdownRegistry {
    pub fn new(locale: Locale) -> Self {
        LiveCountdownRegistry { locale, groups: BTreeMap::new() }
    }

    /// Urgency window for an origin, seconds.
    pub fn urgency_window(origin_tag: &str) -> i64 {
        if is_ishikura_origin(origin_tag) {
            ISHIKURA_URGENCY_WINDOW_SECS
        } else {
            URGENCY_WINDOW_SECS
        }
    }

    /// Discard every record and rebuild from a fresh payload.
    /// Groups that carry an error or no buses hold no records.
    pub fn replace(&mut self, payload: &DashboardPayload, now: DateTime<Utc>) {
        self.groups.clear();

        let Some(routes) = payload.routes_bus_data.as_ref() else {
            info!("Payload carries no route data; registry cleared");
            return;
        };

        for (group_id, route) in routes {
            if route.bus_error_message.is_some() || route.buses_to_display.is_empty() {
                continue;
            }
            let arrivals: Vec<LiveArrival> = route
                .buses_to_display
                .iter()
                .map(|record| self.admit(record.clone(), now))
                .collect();
            self.groups.insert(group_id.clone(), arrivals);
        }

        info!(
            "Registry rebuilt: {} groups, {} records ({} live)",
            self.groups.len(),
            self.len(),
            self.live_count()
        );
    }

    fn admit(&self, record: ArrivalRecord, now: DateTime<Utc>) -> LiveArrival {
        let status = StatusClassifier::classify_in(self.locale, &record);

        let (source, display_seconds) = match (record.departure_at(), record.seconds_until_departure) {
            (Some(at), Some(secs)) => (CountdownSource::Timestamp(at), secs),
            (Some(at), None) => (CountdownSource::Timestamp(at), Self::seconds_until(at, now)),
            (None, Some(secs)) => (CountdownSource::Decrement, secs),
            (None, None) => (CountdownSource::Static(self.static_text(&record)), -1),
        };

        let mut arrival = LiveArrival {
            record,
            source,
            display_seconds,
            is_urgent: status.is_urgent,
            state: if status.is_urgent { LiveState::UrgentSoon } else { LiveState::Scheduled },
            status,
            countdown_text: String::new(),
        };

        let timed = !matches!(arrival.source, CountdownSource::Static(_));
        if arrival.status.is_departed || (timed && display_seconds < 0) {
            self.mark_departed(&mut arrival);
        } else if let CountdownSource::Static(text) = &arrival.source {
            arrival.countdown_text = text.clone();
        } else {
            arrival.countdown_text =
                CountdownFormatter::format_in(self.locale, display_seconds, arrival.record.origin_tag());
        }

        arrival
    }

    fn static_text(&self, record: &ArrivalRecord) -> String {
        match record.time_until_text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => match self.locale {
                Locale::En => "unknown".to_string(),
                Locale::Ja => "不明".to_string(),
            },
        }
    }

    fn seconds_until(at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        (at - now).num_milliseconds().div_euclid(1000).max(-1)
    }

    fn mark_departed(&self, arrival: &mut LiveArrival) {
        arrival.state = LiveState::Departed;
        arrival.countdown_text.clear();
        arrival.is_urgent = false;
        arrival.status = Status::departed(self.locale);
        if arrival.display_seconds >= 0 && !matches!(arrival.source, CountdownSource::Static(_)) {
            arrival.display_seconds = -1;
        }
    }

    fn tick_urgency(arrival: &LiveArrival, remaining: i64) -> bool {
        if remaining < 0 {
            return false;
        }
        let record = &arrival.record;
        if record.delay().is_some() && !StatusClassifier::has_imminent_marker(record) {
            return false;
        }
        remaining <= Self::urgency_window(record.origin_tag())
    }

    /// Advance every live record by one tick. Departed and static rows
    /// produce no update.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let locale = self.locale;
        let mut groups = std::mem::take(&mut self.groups);

        for (group_id, arrivals) in groups.iter_mut() {
            for (index, arrival) in arrivals.iter_mut().enumerate() {
                if !arrival.is_live() {
                    continue;
                }

                let previous = arrival.display_seconds;
                let remaining = match &arrival.source {
                    CountdownSource::Timestamp(at) => Self::seconds_until(*at, now),
                    CountdownSource::Decrement => (previous - 1).max(-1),
                    CountdownSource::Static(_) => continue,
                };
                arrival.display_seconds = remaining;

                let key = RenderKey::new(group_id.clone(), index);
                if remaining < 0 {
                    self.mark_departed(arrival);
                    debug!("{} departed", key);
                    report.updates.push(CountdownUpdate {
                        key,
                        display_seconds: remaining,
                        text: String::new(),
                        is_urgent: false,
                        state: LiveState::Departed,
                        departed_now: true,
                    });
                    continue;
                }

                arrival.countdown_text =
                    CountdownFormatter::format_in(locale, remaining, arrival.record.origin_tag());
                arrival.is_urgent = Self::tick_urgency(arrival, remaining);
                arrival.state = if arrival.is_urgent { LiveState::UrgentSoon } else { LiveState::Scheduled };
                trace!("{} -> {}s '{}'", key, remaining, arrival.countdown_text);

                report.updates.push(CountdownUpdate {
                    key,
                    display_seconds: remaining,
                    text: arrival.countdown_text.clone(),
                    is_urgent: arrival.is_urgent,
                    state: arrival.state,
                    departed_now: false,
                });
            }
        }

        self.groups = groups;
        report.live_remaining = self.live_count();
        report
    }

    pub fn get(&self, key: &RenderKey) -> Option<&LiveArrival> {
        self.groups.get(&key.group_id).and_then(|arrivals| arrivals.get(key.index))
    }

    pub fn groups(&self) -> impl Iterator<Item = (&String, &Vec<LiveArrival>)> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.groups
            .values()
            .flat_map(|arrivals| arrivals.iter())
            .filter(|a| a.is_live())
            .count()
    }

    pub fn has_live_records(&self) -> bool {
        self.groups.values().flat_map(|arrivals| arrivals.iter()).any(LiveArrival::is_live)
    }
}
