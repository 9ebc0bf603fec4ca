// Countdown text for a single arrival row
use crate::kb_models::{is_ishikura_origin, DETAIL_THRESHOLD_SECS, ISHIKURA_DETAIL_THRESHOLD_SECS};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Ja,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Locale::En),
            "ja" | "jp" | "japanese" => Ok(Locale::Ja),
            other => Err(format!("unsupported locale '{}' (expected 'en' or 'ja')", other)),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locale::En => f.write_str("en"),
            Locale::Ja => f.write_str("ja"),
        }
    }
}

pub struct CountdownFormatter;

impl CountdownFormatter {
    pub const DEPARTURE_NOW: &'static str = "departure time now";
    const DEPARTURE_NOW_JA: &'static str = "発車時刻です";

    /// Seconds at or below which the countdown includes a seconds component.
    pub fn detail_threshold(origin_tag: &str) -> i64 {
        if is_ishikura_origin(origin_tag) {
            ISHIKURA_DETAIL_THRESHOLD_SECS
        } else {
            DETAIL_THRESHOLD_SECS
        }
    }

    /// English countdown text.
    ///
    /// Negative input yields an empty string; the caller shows "departed"
    /// elsewhere. Beyond the detail threshold minutes are rounded *up*.
    pub fn format(seconds_remaining: i64, origin_tag: &str) -> String {
        Self::format_in(Locale::En, seconds_remaining, origin_tag)
    }

    pub fn format_in(locale: Locale, seconds_remaining: i64, origin_tag: &str) -> String {
        if seconds_remaining < 0 {
            return String::new();
        }
        if seconds_remaining == 0 {
            return match locale {
                Locale::En => Self::DEPARTURE_NOW.to_string(),
                Locale::Ja => Self::DEPARTURE_NOW_JA.to_string(),
            };
        }

        let threshold = Self::detail_threshold(origin_tag);

        if seconds_remaining < 60 {
            match locale {
                Locale::En => format!("in {} seconds", seconds_remaining),
                Locale::Ja => format!("あと{}秒", seconds_remaining),
            }
        } else if seconds_remaining <= threshold {
            let minutes = seconds_remaining / 60;
            let seconds = seconds_remaining % 60;
            match locale {
                Locale::En => format!("in {} minutes {} seconds", minutes, seconds),
                Locale::Ja => format!("あと{}分{}秒", minutes, seconds),
            }
        } else {
            let minutes = seconds_remaining / 60 + i64::from(seconds_remaining % 60 != 0);
            match locale {
                Locale::En => format!("in {} minutes", minutes),
                Locale::Ja => format!("あと{}分", minutes),
            }
        }
    }
}
