//! Periodic timestamp injector.
//!
//! Appends a `timestamp:` line to the shared log on a fixed interval,
//! independent of client traffic.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::shutdown::ShutdownListener;
use crate::storage::SharedLog;

/// strftime-style layout of an injected line (RFC 2822 date).
pub const TIMESTAMP_FORMAT: &str = "timestamp:%a, %d %b %Y %T %z\n";

/// Render `now` as a timestamp line, including the trailing newline.
pub fn format_timestamp<Tz>(now: &DateTime<Tz>) -> std::result::Result<String, std::fmt::Error>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut line = String::with_capacity(48);
    write!(line, "{}", now.format(TIMESTAMP_FORMAT))?;
    Ok(line)
}

/// Run the injector until shutdown is requested.
///
/// The first line is written one `period` after start. Shutdown is only
/// observed between firings, so a firing that has begun always completes.
/// A log failure ends the injector with that error.
pub async fn run(
    log: Arc<SharedLog>,
    period: Duration,
    mut shutdown: ShutdownListener,
) -> Result<()> {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                debug!("Timestamp injector stopped");
                return Ok(());
            }
            _ = interval.tick() => {}
        }

        let line = match format_timestamp(&Local::now()) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to format the current timestamp");
                continue;
            }
        };

        log.append_only(line.as_bytes()).await?;
        trace!(line = line.trim_end(), "Injected timestamp");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use chrono::FixedOffset;

    #[test]
    fn test_format_timestamp() {
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 5, 14, 7, 9)
            .unwrap();
        assert_eq!(
            format_timestamp(&now).unwrap(),
            "timestamp:Tue, 05 Mar 2024 14:07:09 +0000\n"
        );

        let now = FixedOffset::west_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2023, 12, 31, 23, 59, 59)
            .unwrap();
        assert_eq!(
            format_timestamp(&now).unwrap(),
            "timestamp:Sun, 31 Dec 2023 23:59:59 -0700\n"
        );
    }

    async fn dump(log: &SharedLog) -> String {
        let mut out = Vec::new();
        log.append_and_dump(b"", &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_injects_lines_periodically() {
        let dir = tempfile::tempdir().unwrap();
        let log = SharedLog::open(dir.path().join("data")).await.unwrap();
        let shutdown = Shutdown::new();

        let task = tokio::spawn(run(
            Arc::clone(&log),
            Duration::from_millis(50),
            shutdown.subscribe(),
        ));
        tokio::time::sleep(Duration::from_millis(280)).await;
        shutdown.trigger();
        task.await.unwrap().unwrap();

        let contents = dump(&log).await;
        let lines: Vec<&str> = contents.lines().collect();
        assert!(lines.len() >= 2, "expected several firings, got {lines:?}");
        assert!(lines.iter().all(|l| l.starts_with("timestamp:")));
        assert!(contents.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_stops_before_first_firing() {
        let dir = tempfile::tempdir().unwrap();
        let log = SharedLog::open(dir.path().join("data")).await.unwrap();
        let shutdown = Shutdown::new();

        let task = tokio::spawn(run(
            Arc::clone(&log),
            Duration::from_secs(3600),
            shutdown.subscribe(),
        ));
        shutdown.trigger();
        task.await.unwrap().unwrap();

        assert!(dump(&log).await.is_empty());
    }
}
