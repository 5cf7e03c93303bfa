/// Utility functions for log formatting and cancellation
use std::future::Future;
use time::{format_description, OffsetDateTime};
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format.
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    match format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]") {
        Ok(format) => dt.format(&format).unwrap_or_else(|_| dt.to_string()),
        Err(_) => dt.to_string(),
    }
}

/// Convert a time::Duration to whole seconds, clamping negative spans to zero
pub fn duration_to_seconds(duration: time::Duration) -> u64 {
    duration.whole_seconds().max(0) as u64
}

/// Round a value to the given number of decimal places
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Run `fut` unless `cancel` fires first
pub async fn until_cancelled<F>(cancel: &CancellationToken, fut: F) -> Result<F::Output, SyncError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::ContextCancelled),
        output = fut => Ok(output),
    }
}
