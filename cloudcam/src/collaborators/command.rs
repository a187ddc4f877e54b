//! Adapters for the observatory status-server command-line tools.
//!
//! `ssGet <key>` prints a value; `ssPut NAME=<key> VALUE=<v> COMMENT=<c>`
//! stores one. Both are short-lived processes, run with a deadline.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

use super::process;
use super::{StatusSink, SunTimeSource};
use crate::config::{StatusSettings, SunTimeSettings};
use crate::error::{ErrorContext, OpsError, OpsResult};
use crate::models::SunEvent;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse a local wall-clock timestamp at a fixed UTC offset.
pub fn parse_local_timestamp(
    raw: &str,
    format: &str,
    utc_offset_hours: f64,
) -> Result<DateTime<Utc>, String> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), format)
        .map_err(|e| format!("cannot parse {:?} with {:?}: {}", raw.trim(), format, e))?;
    let offset_secs = (utc_offset_hours * 3600.0).round() as i32;
    let offset = FixedOffset::east_opt(offset_secs)
        .ok_or_else(|| format!("invalid UTC offset {} h", utc_offset_hours))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("ambiguous local time {:?}", raw.trim()))
}

/// Sun times from `ssGet /t/ephem/{sunriseTime,sunsetTime}`.
#[derive(Debug, Clone)]
pub struct CommandSunTimeSource {
    settings: SunTimeSettings,
}

impl CommandSunTimeSource {
    pub fn new(settings: SunTimeSettings) -> Self {
        Self { settings }
    }

    fn key(&self, event: SunEvent) -> String {
        format!("{}{}", self.settings.key_prefix, event.key())
    }
}

#[async_trait]
impl SunTimeSource for CommandSunTimeSource {
    async fn fetch(&self, event: SunEvent) -> OpsResult<DateTime<Utc>> {
        let key = self.key(event);
        let context = || {
            ErrorContext::new("fetch_sun_time")
                .with_endpoint(&self.settings.command)
                .with_details(key.clone())
        };

        let output = process::run(&self.settings.command, [key.as_str()], COMMAND_TIMEOUT)
            .await
            .map_err(|e| OpsError::source_unavailable(e.to_string(), context()))?;
        let raw = String::from_utf8_lossy(&output.stdout);

        let at = parse_local_timestamp(
            &raw,
            &self.settings.time_format,
            self.settings.utc_offset_hours,
        )
        .map_err(|msg| OpsError::source_unavailable(msg, context()))?;
        debug!(event = %event, raw = %raw.trim(), utc = %at, "Fetched sun time");
        Ok(at)
    }
}

/// Status updates through `ssPut`.
#[derive(Debug, Clone)]
pub struct CommandStatusSink {
    command: String,
}

impl CommandStatusSink {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn from_settings(settings: &StatusSettings) -> Self {
        Self::new(settings.command.clone())
    }
}

#[async_trait]
impl StatusSink for CommandStatusSink {
    async fn put(&self, key: &str, value: &str, comment: &str) -> OpsResult<()> {
        let args = [
            format!("NAME={}", key),
            format!("VALUE={}", value),
            format!("COMMENT={}", comment),
        ];
        process::run(&self.command, &args, COMMAND_TIMEOUT)
            .await
            .map_err(|e| {
                OpsError::source_unavailable(
                    e.to_string(),
                    ErrorContext::new("put_status")
                        .with_endpoint(&self.command)
                        .with_details(format!("{}={}", key, value)),
                )
            })?;
        Ok(())
    }
}
