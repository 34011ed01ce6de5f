use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;

use crate::error::Result;

use super::client::GitHubClient;

/// Below this many remaining calls the guard waits for the quota to reset.
pub const LOW_WATER_MARK: u64 = 10;

/// Core REST quota as reported by `GET /rate_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitStatus {
    #[serde(default)]
    pub limit: u64,
    pub remaining: u64,
    /// Epoch seconds at which the quota is replenished
    pub reset: i64,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitStatus,
}

impl RateLimitStatus {
    pub fn is_exhausted(&self) -> bool {
        self.remaining < LOW_WATER_MARK
    }

    /// How long to wait at `now`: until one second past the reset instant when
    /// exhausted, nothing otherwise.
    pub fn pause_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.is_exhausted() {
            return None;
        }

        let resume_ms = (self.reset + 1) * 1000;
        let wait_ms = resume_ms - now.timestamp_millis();
        #[allow(clippy::cast_sign_loss)]
        Some(Duration::from_millis(wait_ms.max(0) as u64))
    }
}

impl GitHubClient {
    pub async fn fetch_rate_limit(&self) -> Result<RateLimitStatus> {
        let url = self.endpoint("rate_limit")?;
        let response: RateLimitResponse = self.get_json(url).await?;
        Ok(response.resources.core)
    }
}

/// Sleeps until the quota resets when fewer than [`LOW_WATER_MARK`] calls remain.
///
/// A failing rate-limit query never blocks: an upstream outage must not turn
/// into a stall of its own.
pub async fn guard(client: &GitHubClient) {
    let status = match client.fetch_rate_limit().await {
        Ok(status) => status,
        Err(err) => {
            debug!("Rate limit query failed, continuing without pause: {err}");
            return;
        }
    };

    wait_for_reset(&status, Utc::now()).await;
}

async fn wait_for_reset(status: &RateLimitStatus, now: DateTime<Utc>) {
    match status.pause_at(now) {
        Some(pause) => {
            warn!(
                "Rate limit nearly exhausted ({} of {} calls left), pausing for {}s",
                status.remaining,
                status.limit,
                pause.as_secs()
            );
            tokio::time::sleep(pause).await;
        }
        None => debug!("Rate limit OK: {} calls remaining", status.remaining),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn status(remaining: u64, reset: i64) -> RateLimitStatus {
        RateLimitStatus {
            limit: 5000,
            remaining,
            reset,
        }
    }

    #[test]
    fn test_low_remaining_pauses_until_one_second_past_reset() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let pause = status(3, now.timestamp() + 5).pause_at(now);
        assert_eq!(pause, Some(Duration::from_secs(6)));
    }

    #[test]
    fn test_remaining_at_low_water_mark_does_not_pause() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(status(LOW_WATER_MARK, now.timestamp() + 5).pause_at(now), None);
        assert_eq!(status(4999, now.timestamp() + 5).pause_at(now), None);
    }

    #[test]
    fn test_reset_in_the_past_does_not_wait() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let pause = status(0, now.timestamp() - 30).pause_at(now);
        assert_eq!(pause, Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_quota_sleeps_until_past_reset() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let started = tokio::time::Instant::now();

        wait_for_reset(&status(3, now.timestamp() + 5), now).await;

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(6), "waited only {waited:?}");
        assert!(waited < Duration::from_millis(6100), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_quota_does_not_sleep() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let started = tokio::time::Instant::now();

        wait_for_reset(&status(4990, now.timestamp() + 5), now).await;

        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_deserialize_rate_limit_response() {
        let body = r#"{
            "resources": {
                "core": { "limit": 5000, "used": 4997, "remaining": 3, "reset": 1704067205 },
                "search": { "limit": 30, "used": 0, "remaining": 30, "reset": 1704067260 }
            },
            "rate": { "limit": 5000, "used": 4997, "remaining": 3, "reset": 1704067205 }
        }"#;
        let response: RateLimitResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.resources.core, status(3, 1_704_067_205));
    }
}
