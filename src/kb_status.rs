// Status classification for arrival records
//
// Two passes: an ordered rule list assigns the primary status, then an
// urgency pass reconciles the server's `is_urgent` flag with the numeric
// and textual evidence. Explicit delay and departed evidence always win.

use crate::kb_countdown::Locale;
use crate::kb_models::{ArrivalRecord, IMMINENT_SECS, URGENCY_WINDOW_SECS};

const DEPARTED_MARKERS: &[&str] = &["出発しました", "通過しました", "出発済み", "departed", "passed"];
const IMMINENT_MARKERS: &[&str] = &["まもなく", "imminent"];
const ON_TIME_MARKERS: &[&str] = &["(予定通り)", "(on-time)"];
const POSSIBLE_DELAY_MARKERS: &[&str] = &["(遅延可能性あり)", "(possible-delay)"];
const SCHEDULED_MARKERS: &[&str] = &["(予定)", "(scheduled)"];

/// Upstream wording meaning "will leave on schedule".
pub const ON_SCHEDULE_NOTE: &str = "予定通り発車します";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusCategory {
    DelayedExplicit,
    Departed,
    Soon,
    OnTime,
    DelayedPossible,
    Scheduled,
    #[default]
    Unclassified,
}

impl StatusCategory {
    /// CSS-style class name used by the presentation layer; empty when unclassified.
    pub fn as_class(&self) -> &'static str {
        match self {
            StatusCategory::DelayedExplicit => "delayed-explicit",
            StatusCategory::Departed => "departed",
            StatusCategory::Soon => "soon",
            StatusCategory::OnTime => "on-time",
            StatusCategory::DelayedPossible => "delayed-possible",
            StatusCategory::Scheduled => "scheduled",
            StatusCategory::Unclassified => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelKind {
    Departed,
    Imminent,
    Approaching,
    OnTime,
    PossibleDelay,
    Scheduled,
}

impl LabelKind {
    fn text(self, locale: Locale) -> &'static str {
        match (self, locale) {
            (LabelKind::Departed, Locale::En) => "departed",
            (LabelKind::Departed, Locale::Ja) => "出発済み",
            (LabelKind::Imminent, Locale::En) => "departing imminently",
            (LabelKind::Imminent, Locale::Ja) => "まもなく発車",
            (LabelKind::Approaching, Locale::En) => "approaching",
            (LabelKind::Approaching, Locale::Ja) => "接近中",
            (LabelKind::OnTime, Locale::En) => "on time",
            (LabelKind::OnTime, Locale::Ja) => "予定通り",
            (LabelKind::PossibleDelay, Locale::En) => "possible delay",
            (LabelKind::PossibleDelay, Locale::Ja) => "遅延可能性あり",
            (LabelKind::Scheduled, Locale::En) => "scheduled",
            (LabelKind::Scheduled, Locale::Ja) => "予定",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Status {
    pub label: Option<String>,
    pub category: StatusCategory,
    pub is_urgent: bool,
    pub is_departed: bool,
}

impl Status {
    /// Terminal status applied by the registry once the countdown runs out.
    pub fn departed(locale: Locale) -> Self {
        Status {
            label: Some(LabelKind::Departed.text(locale).to_string()),
            category: StatusCategory::Departed,
            is_urgent: false,
            is_departed: true,
        }
    }
}

pub struct StatusClassifier;

impl StatusClassifier {
    pub fn classify(record: &ArrivalRecord) -> Status {
        Self::classify_in(Locale::En, record)
    }

    pub fn classify_in(locale: Locale, record: &ArrivalRecord) -> Status {
        let mut status = Self::primary(locale, record);
        Self::reconcile_urgency(locale, record, &mut status);
        status
    }

    /// Whether upstream text says the bus is about to leave.
    pub fn has_imminent_marker(record: &ArrivalRecord) -> bool {
        record.status_contains_any(IMMINENT_MARKERS)
    }

    /// Status text promises an on-schedule departure that the category doesn't already show.
    pub fn shows_on_schedule_note(record: &ArrivalRecord, status: &Status) -> bool {
        let promised = record
            .raw_status_text
            .as_deref()
            .map(|text| text.contains(ON_SCHEDULE_NOTE))
            .unwrap_or(false);

        promised
            && !matches!(
                status.category,
                StatusCategory::OnTime | StatusCategory::Departed | StatusCategory::DelayedExplicit
            )
    }

    // First matching rule wins.
    fn primary(locale: Locale, record: &ArrivalRecord) -> Status {
        if let Some(delay) = record.delay() {
            return Status {
                label: Some(delay.to_string()),
                category: StatusCategory::DelayedExplicit,
                is_urgent: false,
                is_departed: false,
            };
        }

        if record.status_contains_any(DEPARTED_MARKERS) {
            return Status::departed(locale);
        }

        let within_imminent = record
            .seconds_until_departure
            .map(|secs| secs <= IMMINENT_SECS)
            .unwrap_or(false);
        if record.server_urgent_flag && (within_imminent || Self::has_imminent_marker(record)) {
            return Status {
                label: Some(LabelKind::Imminent.text(locale).to_string()),
                category: StatusCategory::Soon,
                is_urgent: true,
                is_departed: false,
            };
        }

        let mut status = Status {
            is_urgent: record.server_urgent_flag,
            ..Status::default()
        };

        if record.status_contains_any(ON_TIME_MARKERS) {
            status.category = StatusCategory::OnTime;
            status.label = Some(LabelKind::OnTime.text(locale).to_string());
        } else if record.status_contains_any(POSSIBLE_DELAY_MARKERS) {
            status.category = StatusCategory::DelayedPossible;
            status.label = Some(LabelKind::PossibleDelay.text(locale).to_string());
            status.is_urgent = false;
        } else if record.status_contains_any(SCHEDULED_MARKERS) {
            status.category = StatusCategory::Scheduled;
            status.label = Some(LabelKind::Scheduled.text(locale).to_string());
        }

        status
    }

    fn reconcile_urgency(locale: Locale, record: &ArrivalRecord, status: &mut Status) {
        if !record.server_urgent_flag {
            return;
        }
        if matches!(
            status.category,
            StatusCategory::Soon | StatusCategory::DelayedExplicit | StatusCategory::Departed
        ) {
            return;
        }

        status.is_urgent = true;
        match record.seconds_until_departure {
            Some(secs) if secs > 0 && secs <= URGENCY_WINDOW_SECS => {
                if status.label.is_none() {
                    status.category = StatusCategory::Soon;
                    status.label = Some(LabelKind::Approaching.text(locale).to_string());
                }
            }
            Some(secs) if secs > URGENCY_WINDOW_SECS => status.is_urgent = false,
            _ => {}
        }
    }
}
