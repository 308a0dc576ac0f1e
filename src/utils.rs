// ABOUTME: Small helpers shared by the sync engine, status line and commands
// ABOUTME: Human readable durations and sizes, padding, local timestamps and retries

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::time::Duration;

/// Format seconds as `1h2m3s`, hours and minutes only when non-zero.
///
/// # Examples
///
/// ```
/// # use sqlmirror::utils::seconds_to_hr;
/// assert_eq!(seconds_to_hr(3723), "1h2m3s");
/// assert_eq!(seconds_to_hr(59), "59s");
/// ```
pub fn seconds_to_hr(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    out.push_str(&format!("{}s", seconds));
    out
}

/// Format a byte count as GiB, MiB or KiB with two decimals.
pub fn size_hr(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    let size = bytes as f64;
    if size > GIB {
        format!("{:.2} GiB", size / GIB)
    } else if size > MIB {
        format!("{:.2} MiB", size / MIB)
    } else if size > KIB {
        format!("{:.2} KiB", size / KIB)
    } else {
        bytes.to_string()
    }
}

/// Pad `s` with spaces on the right up to `width` characters.
pub fn right_pad(s: &str, width: usize) -> String {
    format!("{:<width$}", s, width = width)
}

/// `YYYY-MM-DD_HH:MM` in the given time zone.
pub fn timestamp(tz: Tz) -> String {
    format_timestamp(Utc::now(), tz)
}

pub fn format_timestamp(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d_%H:%M").to_string()
}

/// Retry an async operation with exponential backoff
///
/// Delays double after each failed attempt. The last error is returned once
/// `max_retries` retries have failed.
///
/// # Arguments
///
/// * `operation` - Async closure to retry
/// * `max_retries` - Retries after the first attempt
/// * `initial_delay` - Delay before the first retry
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < max_retries {
                    tracing::warn!(
                        "Operation failed (attempt {}/{}): {:#}, retrying in {:?}...",
                        attempt + 1,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed after retries")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_seconds_to_hr() {
        assert_eq!(seconds_to_hr(0), "0s");
        assert_eq!(seconds_to_hr(60), "1m0s");
        assert_eq!(seconds_to_hr(3600), "1h0s");
        assert_eq!(seconds_to_hr(3723), "1h2m3s");
    }

    #[test]
    fn test_size_hr() {
        assert_eq!(size_hr(512), "512");
        assert_eq!(size_hr(2048), "2.00 KiB");
        assert_eq!(size_hr(5 * 1024 * 1024 + 1), "5.00 MiB");
        assert_eq!(size_hr(3 * 1024 * 1024 * 1024 + 1), "3.00 GiB");
    }

    #[test]
    fn test_right_pad() {
        assert_eq!(right_pad("ab", 5), "ab   ");
        assert_eq!(right_pad("abcdef", 3), "abcdef");
    }

    #[test]
    fn test_format_timestamp_in_zone() {
        let at = Utc.with_ymd_and_hms(2025, 1, 15, 23, 30, 0).unwrap();
        assert_eq!(
            format_timestamp(at, chrono_tz::Europe::Stockholm),
            "2025-01-16_00:30"
        );
    }

    #[tokio::test]
    async fn test_retry_with_backoff_success() {
        let mut attempts = 0;
        let result = retry_with_backoff(
            || {
                attempts += 1;
                async move {
                    if attempts < 3 {
                        anyhow::bail!("Temporary failure")
                    } else {
                        Ok("Success")
                    }
                }
            },
            5,
            Duration::from_millis(5),
        )
        .await;
        assert_eq!(result.unwrap(), "Success");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_gives_up() {
        let mut attempts = 0;
        let result: Result<()> = retry_with_backoff(
            || {
                attempts += 1;
                async { anyhow::bail!("Permanent failure") }
            },
            2,
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }
}
