use std::{fmt, time::Duration};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::{CET, Tz};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const REQUEST_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FORECAST_DATE_FORMAT: &str = "%Y-%m-%d";

/// A response field that is present but unusable, or a required field that is absent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}`: {reason}")]
pub struct ParseError {
    pub field: &'static str,
    pub reason: String,
}

impl ParseError {
    pub(crate) fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "missing from response".to_string(),
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl fmt::Display) -> Self {
        Self {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Top-level JSON object returned by the API.
///
/// ```json
/// { "code": 200, "message": "OK", "result": { ... },
///   "callsDailyLimit": 100, "callsLeft": 99, "callsResetInSeconds": 3600 }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub code: i64,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub calls_daily_limit: Option<u32>,
    pub calls_left: Option<u32>,
    pub calls_reset_in_seconds: Option<u64>,
}

impl Envelope {
    pub(crate) fn message_or_default(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

/// Ice warning classification derived from the numeric forecast id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ForecastType {
    #[serde(rename = "No ice")]
    NoIce,
    #[serde(rename = "Possibly ice")]
    PossiblyIce,
    #[serde(rename = "Ice")]
    Ice,
}

impl ForecastType {
    /// `1` is ice, `2` is possibly ice, everything else (or nothing) is no ice.
    pub fn from_status_id(status_id: Option<i64>) -> Self {
        match status_id {
            Some(1) => ForecastType::Ice,
            Some(2) => ForecastType::PossiblyIce,
            _ => ForecastType::NoIce,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastType::NoIce => "No ice",
            ForecastType::PossiblyIce => "Possibly ice",
            ForecastType::Ice => "Ice",
        }
    }
}

impl fmt::Display for ForecastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ice warning prediction for the configured location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Forecast {
    /// When the API recorded the request, in CET.
    pub request_date: DateTime<Tz>,
    pub status_id: Option<i64>,
    /// Human readable description, trailing periods removed.
    pub text: Option<String>,
    pub city: Option<String>,
    pub forecast_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawForecast {
    request_date: Option<String>,
    forecast_id: Option<i64>,
    forecast_text: Option<String>,
    forecast_city: Option<String>,
    forecast_date: Option<String>,
}

impl Forecast {
    /// Build a forecast from the `result` object of a response envelope.
    ///
    /// Text, city and forecast id may be absent. Both dates are required and
    /// must match their fixed formats.
    pub fn from_response(envelope: &Envelope) -> Result<Self, ParseError> {
        let result = envelope
            .result
            .as_ref()
            .ok_or_else(|| ParseError::missing("result"))?;

        let raw = RawForecast::deserialize(result).map_err(|e| ParseError::invalid("result", e))?;

        let request_date = raw
            .request_date
            .as_deref()
            .ok_or_else(|| ParseError::missing("requestDate"))
            .and_then(parse_request_date)?;

        let forecast_date = raw
            .forecast_date
            .as_deref()
            .ok_or_else(|| ParseError::missing("forecastDate"))
            .and_then(parse_forecast_date)?;

        Ok(Forecast {
            request_date,
            status_id: raw.forecast_id,
            text: raw
                .forecast_text
                .map(|t| t.trim_end_matches('.').to_string()),
            city: raw.forecast_city,
            forecast_date,
        })
    }

    pub fn forecast_type(&self) -> ForecastType {
        ForecastType::from_status_id(self.status_id)
    }
}

fn parse_request_date(s: &str) -> Result<DateTime<Tz>, ParseError> {
    let naive = NaiveDateTime::parse_from_str(s, REQUEST_DATE_FORMAT)
        .map_err(|e| ParseError::invalid("requestDate", format!("{s:?}: {e}")))?;

    // Ambiguous wall-clock times (end of summer time) resolve to the first instant.
    CET.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ParseError::invalid("requestDate", format!("{s:?} does not exist in CET")))
}

fn parse_forecast_date(s: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(s, FORECAST_DATE_FORMAT)
        .map_err(|e| ParseError::invalid("forecastDate", format!("{s:?}: {e}")))
}

/// Quota state as reported by the last successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct Ratelimit {
    pub call_limit: Option<u32>,
    pub remaining_calls: Option<u32>,
    /// Seconds until the quota resets.
    pub retry_after: Option<u64>,
}

impl Ratelimit {
    pub fn from_response(envelope: &Envelope) -> Self {
        Self {
            call_limit: envelope.calls_daily_limit,
            remaining_calls: envelope.calls_left,
            retry_after: envelope.calls_reset_in_seconds,
        }
    }

    pub fn retry_after_duration(&self) -> Option<Duration> {
        self.retry_after.map(Duration::from_secs)
    }
}
