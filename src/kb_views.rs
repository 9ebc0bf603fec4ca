// Terminal views for the Kanachu bus board
use crate::kb_countdown::Locale;
use crate::kb_models::{DashboardPayload, DirectionGroup, KBError, RenderKey, RouteDisplayData};
use crate::kb_registry::{LiveArrival, LiveCountdownRegistry, LiveState, TickReport};
use crate::kb_scheduler::Presenter;
use crate::kb_status::{StatusCategory, StatusClassifier, ON_SCHEDULE_NOTE};
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Asia::Tokyo;
use log::warn;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

// ============================================================================
// Service state
// ============================================================================

pub const SERVICE_START_HOUR: u32 = 6;
pub const SERVICE_START_MINUTE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    AwaitingFirstBus,
    Error,
    NoInformation,
    Monitoring,
}

impl ServiceState {
    /// `hour`/`minute` are Tokyo local time.
    pub fn derive(hour: u32, minute: u32, has_error: bool, has_buses: bool) -> Self {
        if hour < SERVICE_START_HOUR || (hour == SERVICE_START_HOUR && minute < SERVICE_START_MINUTE) {
            ServiceState::AwaitingFirstBus
        } else if has_error {
            ServiceState::Error
        } else if !has_buses {
            ServiceState::NoInformation
        } else {
            ServiceState::Monitoring
        }
    }

    pub fn message(&self, locale: Locale) -> String {
        match (self, locale) {
            (ServiceState::AwaitingFirstBus, Locale::En) => format!(
                "Waiting for the first bus (around {:02}:{:02})",
                SERVICE_START_HOUR, SERVICE_START_MINUTE
            ),
            (ServiceState::AwaitingFirstBus, Locale::Ja) => format!(
                "始発バス待機中 (～{:02}:{:02}目安)",
                SERVICE_START_HOUR, SERVICE_START_MINUTE
            ),
            (ServiceState::Error, Locale::En) => "Error".to_string(),
            (ServiceState::Error, Locale::Ja) => "エラー発生中".to_string(),
            (ServiceState::NoInformation, Locale::En) => {
                "No information / service may have ended".to_string()
            }
            (ServiceState::NoInformation, Locale::Ja) => "情報なし/運行終了の可能性".to_string(),
            (ServiceState::Monitoring, Locale::En) => "Monitoring".to_string(),
            (ServiceState::Monitoring, Locale::Ja) => "監視中".to_string(),
        }
    }
}

// ============================================================================
// Render targets
// ============================================================================

/// Updatable parts of one row, addressed by `RenderKey`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderTarget {
    pub summary: String,
    pub status_label: Option<String>,
    pub countdown: String,
    pub details: Vec<String>,
    pub classes: BTreeSet<String>,
}

impl RenderTarget {
    fn from_arrival(number: usize, arrival: &LiveArrival, direction: DirectionGroup) -> Self {
        let record = &arrival.record;
        let mut classes = BTreeSet::new();

        if direction == DirectionGroup::ToUniversityArea {
            if record.is_ishikura_stop_only {
                classes.insert("ishikura-stop-target".to_string());
            } else if record.is_oyama_for_ishikura {
                classes.insert("oyama-via-ishikura-target".to_string());
            }
        }

        let mut summary = String::new();
        if arrival.is_urgent
            && arrival.status.category == StatusCategory::Soon
            && arrival.state != LiveState::Departed
        {
            summary.push_str("⚠️ ");
        }
        summary.push_str(&format!("{}.", number));
        if record.shows_ishikura_badge(direction) {
            summary.push_str(" [石倉]");
        }
        summary.push(' ');
        summary.push_str(&record.departure_time_main());
        let destination = record.destination_display(direction);
        if !destination.is_empty() {
            summary.push(' ');
            summary.push_str(&destination);
        }

        let mut details = Vec::new();
        if let Some(via) = record.via_detail() {
            details.push(format!("経由: {}", via));
        }
        if let Some(duration) = record.duration_detail() {
            details.push(format!("(所要 {})", duration));
        }
        if StatusClassifier::shows_on_schedule_note(record, &arrival.status) {
            details.push(format!("✓ {}", ON_SCHEDULE_NOTE));
        }

        let mut target = RenderTarget {
            summary,
            status_label: arrival.status.label.clone(),
            countdown: arrival.countdown_text.clone(),
            details,
            classes,
        };
        target.set_state(arrival.is_urgent, arrival.state, arrival.status.category);
        target
    }

    fn set_state(&mut self, urgent: bool, state: LiveState, category: StatusCategory) {
        self.classes.retain(|c| c != "urgent" && c != "departed-bus" && !c.starts_with("status-"));
        if urgent {
            self.classes.insert("urgent".to_string());
        }
        if state == LiveState::Departed {
            self.classes.insert("departed-bus".to_string());
        }
        if !category.as_class().is_empty() {
            self.classes.insert(format!("status-{}", category.as_class()));
        }
    }

    fn line(&self) -> String {
        let mut line = format!("  {}", self.summary);
        if let Some(label) = &self.status_label {
            line.push_str(&format!(" [{}]", label));
        }
        if !self.countdown.is_empty() {
            line.push_str(&format!(" ⏱️  {}", self.countdown));
        }
        line
    }
}

// ============================================================================
// Terminal board
// ============================================================================

pub struct TerminalBoard<W: Write> {
    out: W,
    direction: DirectionGroup,
    locale: Locale,
    clear_between_frames: bool,
    payload: Option<DashboardPayload>,
    targets: BTreeMap<RenderKey, RenderTarget>,
    error: Option<String>,
    frames: usize,
}

impl<W: Write> TerminalBoard<W> {
    pub fn new(out: W, direction: DirectionGroup, locale: Locale, clear_between_frames: bool) -> Self {
        TerminalBoard {
            out,
            direction,
            locale,
            clear_between_frames,
            payload: None,
            targets: BTreeMap::new(),
            error: None,
            frames: 0,
        }
    }

    pub fn target(&self, key: &RenderKey) -> Option<&RenderTarget> {
        self.targets.get(key)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn writer(&self) -> &W {
        &self.out
    }

    fn draw(&mut self, now: DateTime<Utc>) {
        let frame = self.compose(now);
        let written = if self.clear_between_frames {
            write!(self.out, "\x1B[2J\x1B[1;1H{}", frame)
        } else {
            write!(self.out, "{}", frame)
        };
        if let Err(e) = written.and_then(|_| self.out.flush()) {
            warn!("Failed to draw board: {}", e);
        }
        self.frames += 1;
    }

    fn compose(&self, now: DateTime<Utc>) -> String {
        let local = now.with_timezone(&Tokyo);
        let mut frame = String::new();

        frame.push_str(&format!("{}\n", "═".repeat(70)));
        frame.push_str(&format!(
            "🚌 KANACHU BUS BOARD - {}   🕐 {}\n",
            self.direction,
            local.format("%Y-%m-%d %H:%M:%S %Z")
        ));

        let has_buses = self.targets.values().any(|t| !t.classes.contains("departed-bus"));
        let state = ServiceState::derive(local.hour(), local.minute(), self.error.is_some(), has_buses);
        frame.push_str(&format!(
            "{} | {} | 📋 {}\n",
            self.server_indicator(),
            self.weather_summary(),
            state.message(self.locale)
        ));
        frame.push_str(&format!("{}\n", "═".repeat(70)));

        if let Some(error) = &self.error {
            frame.push_str(&format!("\n❌ {}\n", error));
            frame.push_str("   Countdowns paused, will retry next cycle...\n");
        }

        match self.payload.as_ref().and_then(|p| p.routes_bus_data.as_ref()) {
            Some(routes) if !routes.is_empty() => {
                for (group_id, route) in routes {
                    self.compose_route(&mut frame, group_id, route);
                }
            }
            _ => frame.push_str("\nℹ️  No bus information to display.\n"),
        }

        frame.push_str(&format!("{}\n", "─".repeat(70)));
        frame
    }

    fn compose_route(&self, frame: &mut String, group_id: &str, route: &RouteDisplayData) {
        frame.push_str(&format!("\n🚏 {} 発 → {} 行き\n", route.from_stop_name, route.to_stop_name));
        frame.push_str(&format!(
            "   🔄 Bus info last updated: {}\n",
            route.bus_last_updated_str.as_deref().unwrap_or("N/A")
        ));

        if let Some(message) = &route.bus_error_message {
            frame.push_str(&format!("   ⚠️  Bus info error: {}\n", message));
            return;
        }

        let rows: Vec<&RenderTarget> = self
            .targets
            .range(RenderKey::new(group_id, 0)..=RenderKey::new(group_id, usize::MAX))
            .map(|(_, target)| target)
            .collect();

        if rows.is_empty() {
            frame.push_str("   🕐 No buses currently available on this route.\n");
            return;
        }

        for target in rows {
            frame.push_str(&target.line());
            frame.push('\n');
            if !target.details.is_empty() {
                frame.push_str(&format!("       {}\n", target.details.join(" | ")));
            }
        }
    }

    fn server_indicator(&self) -> &'static str {
        match self.payload.as_ref().map(|p| &p.system_status) {
            Some(status) if status.warning => "🟡 Server warning",
            Some(status) if status.healthy => "🟢 Server OK",
            Some(_) => "🔴 Server unhealthy",
            None => "⚪ Server unknown",
        }
    }

    fn weather_summary(&self) -> String {
        let Some(weather) = self.payload.as_ref().and_then(|p| p.weather_data.as_ref()) else {
            return "🌤️  Weather n/a".to_string();
        };
        if let Some(error) = &weather.error_message {
            return format!("🌤️  Weather error: {}", error);
        }

        let icon = if weather.is_rain { "☔" } else { "🌤️ " };
        let mut summary = format!(
            "{} {}",
            icon,
            weather
                .description
                .as_deref()
                .or(weather.condition.as_deref())
                .unwrap_or("n/a")
        );
        if let Some(temp) = weather.temp_c {
            summary.push_str(&format!(" {:.1}°C", temp));
        }
        summary
    }
}

impl<W: Write> Presenter for TerminalBoard<W> {
    fn render_board(
        &mut self,
        payload: &DashboardPayload,
        registry: &LiveCountdownRegistry,
        now: DateTime<Utc>,
    ) {
        self.error = None;
        self.targets.clear();
        for (group_id, arrivals) in registry.groups() {
            for (index, arrival) in arrivals.iter().enumerate() {
                self.targets.insert(
                    RenderKey::new(group_id.clone(), index),
                    RenderTarget::from_arrival(index + 1, arrival, self.direction),
                );
            }
        }
        self.payload = Some(payload.clone());
        self.draw(now);
    }

    fn apply_tick(&mut self, report: &TickReport, registry: &LiveCountdownRegistry, now: DateTime<Utc>) {
        for update in &report.updates {
            let Some(target) = self.targets.get_mut(&update.key) else {
                warn!("No render target for {}", update.key);
                continue;
            };
            target.countdown = update.text.clone();
            let category = registry
                .get(&update.key)
                .map(|a| a.status.category)
                .unwrap_or_default();
            target.set_state(update.is_urgent, update.state, category);
            if update.departed_now {
                target.status_label = registry.get(&update.key).and_then(|a| a.status.label.clone());
            }
        }
        self.draw(now);
    }

    fn show_error(&mut self, error: &KBError, now: DateTime<Utc>) {
        self.error = Some(format!("Bus info could not be refreshed: {}", error));
        for target in self.targets.values_mut() {
            target.classes.insert("stale".to_string());
        }
        self.draw(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb_models::{ArrivalRecord, SystemStatus, WeatherData};
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        // 12:00 JST
        Utc.with_ymd_and_hms(2025, 5, 1, 3, 0, 0).unwrap()
    }

    fn payload() -> DashboardPayload {
        let buses = vec![
            ArrivalRecord {
                departure_time_text: Some("12:02発 (予定通り)".to_string()),
                seconds_until_departure: Some(62),
                origin_stop_tag: Some("石倉".to_string()),
                destination_name: Some("伊勢原駅北口".to_string()),
                via_info: Some("石倉".to_string()),
                duration_text: Some("12分".to_string()),
                ..ArrivalRecord::default()
            },
            ArrivalRecord {
                departure_time_text: Some("12:20発".to_string()),
                seconds_until_departure: Some(1200),
                raw_status_text: Some("12:20発予定 予定通り発車します".to_string()),
                ..ArrivalRecord::default()
            },
        ];
        let mut routes = BTreeMap::new();
        routes.insert(
            "sanno".to_string(),
            RouteDisplayData {
                from_stop_name: "産業能率大学".to_string(),
                to_stop_name: "伊勢原駅北口".to_string(),
                bus_last_updated_str: Some("11:59:58".to_string()),
                bus_error_message: None,
                buses_to_display: buses,
            },
        );
        routes.insert(
            "zz_broken".to_string(),
            RouteDisplayData {
                from_stop_name: "石倉".to_string(),
                to_stop_name: "伊勢原駅北口".to_string(),
                bus_error_message: Some("timeout".to_string()),
                ..RouteDisplayData::default()
            },
        );
        DashboardPayload {
            system_status: SystemStatus { healthy: true, warning: false },
            weather_data: Some(WeatherData {
                description: Some("小雨".to_string()),
                is_rain: true,
                temp_c: Some(17.25),
                ..WeatherData::default()
            }),
            routes_bus_data: Some(routes),
        }
    }

    fn board() -> TerminalBoard<Vec<u8>> {
        TerminalBoard::new(Vec::new(), DirectionGroup::ToStationArea, Locale::En, false)
    }

    fn output(board: &TerminalBoard<Vec<u8>>) -> String {
        String::from_utf8_lossy(board.writer()).into_owned()
    }

    #[test]
    fn test_service_state_rules() {
        assert_eq!(ServiceState::derive(6, 19, true, false), ServiceState::AwaitingFirstBus);
        assert_eq!(ServiceState::derive(6, 20, true, true), ServiceState::Error);
        assert_eq!(ServiceState::derive(12, 0, false, false), ServiceState::NoInformation);
        assert_eq!(ServiceState::derive(23, 59, false, true), ServiceState::Monitoring);
        assert_eq!(ServiceState::Monitoring.message(Locale::Ja), "監視中");
        assert_eq!(
            ServiceState::AwaitingFirstBus.message(Locale::Ja),
            "始発バス待機中 (～06:20目安)"
        );
    }

    #[test]
    fn test_render_board() {
        let payload = payload();
        let mut registry = LiveCountdownRegistry::new(Locale::En);
        registry.replace(&payload, noon());

        let mut board = board();
        board.render_board(&payload, &registry, noon());
        let out = output(&board);

        assert!(out.contains("🚏 産業能率大学 発 → 伊勢原駅北口 行き"));
        assert!(out.contains("1. [石倉] 12:02発 伊勢原駅北口行 [on time] ⏱️  in 1 minutes 2 seconds"));
        assert!(out.contains("経由: 石倉 | (所要 12分)"));
        assert!(out.contains("2. 12:20発 行き先不明 ⏱️  in 20 minutes"));
        assert!(out.contains("✓ 予定通り発車します"));
        assert!(out.contains("Bus info error: timeout"));
        assert!(out.contains("🟢 Server OK"));
        assert!(out.contains("☔ 小雨 17.2°C") || out.contains("☔ 小雨 17.3°C"));
        assert!(out.contains("Monitoring"));
        assert_eq!(board.frames(), 1);

        let first = board.target(&RenderKey::new("sanno", 0)).unwrap();
        assert!(first.classes.contains("status-on-time"));
        assert!(!first.classes.contains("urgent"));
    }

    #[test]
    fn test_tick_updates_targets() {
        let payload = payload();
        let mut registry = LiveCountdownRegistry::new(Locale::En);
        registry.replace(&payload, noon());
        let mut board = board();
        board.render_board(&payload, &registry, noon());

        let report = registry.tick(noon());
        board.apply_tick(&report, &registry, noon());

        let first = board.target(&RenderKey::new("sanno", 0)).unwrap();
        assert_eq!(first.countdown, "in 1 minutes 1 seconds");
        assert!(first.classes.contains("urgent"));
        assert_eq!(board.frames(), 2);

        for _ in 0..62 {
            let report = registry.tick(noon());
            board.apply_tick(&report, &registry, noon());
        }
        let first = board.target(&RenderKey::new("sanno", 0)).unwrap();
        assert_eq!(first.countdown, "");
        assert_eq!(first.status_label.as_deref(), Some("departed"));
        assert!(first.classes.contains("departed-bus"));
        assert!(first.classes.contains("status-departed"));
        assert!(!first.classes.contains("urgent"));
    }

    #[test]
    fn test_error_marks_board_stale() {
        let payload = payload();
        let mut registry = LiveCountdownRegistry::new(Locale::En);
        registry.replace(&payload, noon());
        let mut board = board();
        board.render_board(&payload, &registry, noon());

        board.show_error(&KBError::NetworkError("connection refused".to_string()), noon());
        let out = output(&board);
        assert!(out.contains("❌ Bus info could not be refreshed: Network error: connection refused"));
        assert!(out.contains("| 📋 Error"));
        assert!(board.target(&RenderKey::new("sanno", 1)).unwrap().classes.contains("stale"));
    }

    #[test]
    fn test_empty_payload_message() {
        let registry = LiveCountdownRegistry::new(Locale::En);
        let mut board = board();
        board.render_board(&DashboardPayload::default(), &registry, noon());
        let out = output(&board);
        assert!(out.contains("No bus information to display."));
        assert!(!out.contains("⚪"));
        assert!(out.contains("🔴 Server unhealthy"));
    }

    #[test]
    fn test_university_direction_ishikura_rows() {
        let record = ArrivalRecord {
            departure_time_text: Some("12:10発".to_string()),
            seconds_until_departure: Some(600),
            destination_name: Some("石倉".to_string()),
            is_ishikura_stop_only: true,
            ..ArrivalRecord::default()
        };
        let route = RouteDisplayData { buses_to_display: vec![record], ..RouteDisplayData::default() };
        let payload = DashboardPayload {
            routes_bus_data: Some([("uni".to_string(), route)].into_iter().collect()),
            ..DashboardPayload::default()
        };
        let mut registry = LiveCountdownRegistry::new(Locale::En);
        registry.replace(&payload, noon());

        let mut board = TerminalBoard::new(Vec::new(), DirectionGroup::ToUniversityArea, Locale::En, false);
        board.render_board(&payload, &registry, noon());

        let target = board.target(&RenderKey::new("uni", 0)).unwrap();
        assert_eq!(target.summary, "1. [石倉] 12:10発");
        assert!(target.classes.contains("ishikura-stop-target"));
    }
}
