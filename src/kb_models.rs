// Payload models and shared types for the Kanachu bus countdown board
//
// Upstream endpoint (served by the dashboard backend):
// - GET /api/data?direction_group={to_station_area|to_university_area}
//
// The backend scrapes Kanachu's approach-info pages and hands us one
// `RouteDisplayData` per route group. Everything here is read-only input.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Short origin code the upstream uses for buses starting at Ishikura.
pub const ISHIKURA_ORIGIN: &str = "石倉";

/// Generic urgency window, seconds.
pub const URGENCY_WINDOW_SECS: i64 = 180;

/// Urgency window for buses departing from Ishikura, seconds.
pub const ISHIKURA_URGENCY_WINDOW_SECS: i64 = 420;

/// Countdown shows minutes + seconds at or below this many seconds.
pub const DETAIL_THRESHOLD_SECS: i64 = 180;

/// Detail threshold for buses departing from Ishikura, seconds.
pub const ISHIKURA_DETAIL_THRESHOLD_SECS: i64 = 600;

/// Server-side "about to leave" cutoff used by the imminent rule.
pub const IMMINENT_SECS: i64 = 15;

pub const UNKNOWN_TIME: &str = "時刻不明";
pub const UNKNOWN_DESTINATION: &str = "行き先不明";
const UNKNOWN_DETAIL: &str = "不明";

lazy_static! {
    static ref STATUS_MARKERS: Regex = Regex::new(
        r"(?i)\(予定通り\)|\(予定\)|\(遅延可能性あり\)|まもなく発車します|出発しました|通過しました|発車済みの恐れあり|\(\s*\d+分遅れ\s*\)"
    )
    .expect("status marker pattern is valid");
}

/// True when the origin tag identifies Ishikura (`石倉` or romanized `ishikura`).
pub fn is_ishikura_origin(tag: &str) -> bool {
    let tag = tag.trim();
    tag == ISHIKURA_ORIGIN || tag.eq_ignore_ascii_case("ishikura")
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum KBError {
    NetworkError(String),
    ParseError(String),
    ConfigError(String),
}

impl fmt::Display for KBError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KBError::NetworkError(e) => write!(f, "Network error: {}", e),
            KBError::ParseError(e) => write!(f, "Parse error: {}", e),
            KBError::ConfigError(e) => write!(f, "Config error: {}", e),
        }
    }
}

impl std::error::Error for KBError {}

pub type Result<T> = std::result::Result<T, KBError>;

// ============================================================================
// Direction groups & render keys
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum DirectionGroup {
    #[value(name = "to_station_area")]
    ToStationArea,
    #[value(name = "to_university_area")]
    ToUniversityArea,
}

impl DirectionGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectionGroup::ToStationArea => "to_station_area",
            DirectionGroup::ToUniversityArea => "to_university_area",
        }
    }
}

impl fmt::Display for DirectionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable address of one arrival row: `(route group id, index within the group)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderKey {
    pub group_id: String,
    pub index: usize,
}

impl RenderKey {
    pub fn new(group_id: impl Into<String>, index: usize) -> Self {
        RenderKey { group_id: group_id.into(), index }
    }
}

impl fmt::Display for RenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.group_id, self.index)
    }
}

// ============================================================================
// Payload Structures
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardPayload {
    #[serde(default)]
    pub system_status: SystemStatus,
    #[serde(default)]
    pub weather_data: Option<WeatherData>,
    #[serde(default)]
    pub routes_bus_data: Option<BTreeMap<String, RouteDisplayData>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemStatus {
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub warning: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeatherData {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub temp_c: Option<f64>,
    #[serde(default)]
    pub is_rain: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteDisplayData {
    #[serde(default)]
    pub from_stop_name: String,
    #[serde(default)]
    pub to_stop_name: String,
    #[serde(default)]
    pub bus_last_updated_str: Option<String>,
    #[serde(default)]
    pub bus_error_message: Option<String>,
    #[serde(default)]
    pub buses_to_display: Vec<ArrivalRecord>,
}

/// One scheduled bus as delivered by the poll endpoint.
///
/// Every field is optional on the wire; missing values degrade to
/// "unknown" text instead of failing the whole payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArrivalRecord {
    /// Upstream departure string, e.g. `"10:05発 (予定通り)"`.
    #[serde(default, rename = "departure_time")]
    pub departure_time_text: Option<String>,
    #[serde(default)]
    pub departure_time_iso: Option<String>,
    #[serde(default)]
    pub seconds_until_departure: Option<i64>,
    #[serde(default, rename = "origin_stop_name_short")]
    pub origin_stop_tag: Option<String>,
    #[serde(default, rename = "is_urgent")]
    pub server_urgent_flag: bool,
    #[serde(default, rename = "delay_info")]
    pub delay_text: Option<String>,
    #[serde(default, rename = "status_text")]
    pub raw_status_text: Option<String>,
    #[serde(default, rename = "time_until_departure")]
    pub time_until_text: Option<String>,
    #[serde(default)]
    pub destination_name: Option<String>,
    #[serde(default)]
    pub via_info: Option<String>,
    #[serde(default)]
    pub duration_text: Option<String>,
    #[serde(default)]
    pub is_ishikura_stop_only: bool,
    #[serde(default)]
    pub is_oyama_for_ishikura: bool,
}

impl ArrivalRecord {
    pub fn origin_tag(&self) -> &str {
        self.origin_stop_tag.as_deref().unwrap_or("")
    }

    pub fn is_ishikura_origin(&self) -> bool {
        is_ishikura_origin(self.origin_tag())
    }

    /// Non-empty delay annotation, if any.
    pub fn delay(&self) -> Option<&str> {
        self.delay_text
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }

    /// Parsed departure timestamp. An unparsable value is logged and ignored
    /// so the record falls back to the decrement countdown.
    pub fn departure_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.departure_time_iso.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                warn!("Ignoring malformed departure_time_iso {:?}: {}", raw, e);
                None
            }
        }
    }

    /// Every upstream text that may carry a status marker.
    pub fn status_sources(&self) -> impl Iterator<Item = &str> {
        [
            self.departure_time_text.as_deref(),
            self.raw_status_text.as_deref(),
            self.time_until_text.as_deref(),
        ]
        .into_iter()
        .flatten()
    }

    pub fn status_contains_any(&self, markers: &[&str]) -> bool {
        self.status_sources().any(|text| {
            let lower = text.to_lowercase();
            markers.iter().any(|m| lower.contains(&m.to_lowercase()))
        })
    }

    /// Departure time with all status markers stripped.
    pub fn departure_time_main(&self) -> String {
        match self.departure_time_text.as_deref() {
            Some(text) => {
                let cleaned = STATUS_MARKERS.replace_all(text, "");
                let cleaned = cleaned.trim();
                if cleaned.is_empty() {
                    UNKNOWN_TIME.to_string()
                } else {
                    cleaned.to_string()
                }
            }
            None => UNKNOWN_TIME.to_string(),
        }
    }

    /// Destination label for the given direction group. The Ishikura
    /// stop-only case returns an empty string since the badge carries it.
    pub fn destination_display(&self, direction: DirectionGroup) -> String {
        let default = match self.destination_name.as_deref() {
            Some(dest) if !dest.trim().is_empty() => format!("{}行", dest.trim()),
            _ => UNKNOWN_DESTINATION.to_string(),
        };

        if direction == DirectionGroup::ToUniversityArea && self.is_ishikura_stop_only {
            return String::new();
        }
        default
    }

    /// Whether the row carries an Ishikura badge in the given direction group.
    pub fn shows_ishikura_badge(&self, direction: DirectionGroup) -> bool {
        match direction {
            DirectionGroup::ToStationArea => self.is_ishikura_origin(),
            DirectionGroup::ToUniversityArea => {
                self.is_ishikura_stop_only || self.is_oyama_for_ishikura
            }
        }
    }

    pub fn via_detail(&self) -> Option<&str> {
        Self::known_detail(self.via_info.as_deref())
    }

    pub fn duration_detail(&self) -> Option<&str> {
        Self::known_detail(self.duration_text.as_deref())
    }

    fn known_detail(value: Option<&str>) -> Option<&str> {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty() && *v != UNKNOWN_DETAIL)
    }
}

impl DashboardPayload {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| KBError::ParseError(format!("Invalid JSON response: {}", e)))
    }

    pub fn bus_count(&self) -> usize {
        self.routes_bus_data
            .as_ref()
            .map(|routes| routes.values().map(|r| r.buses_to_display.len()).sum())
            .unwrap_or(0)
    }
}
