//! Time sources.
//!
//! Epoch arithmetic and deferral sleeps go through [`Clock`] so a session can run against wall
//! time in production and against virtual time in tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[async_trait]
pub trait Clock: Send + Sync {
	/// Time since the Unix epoch.
	fn now(&self) -> Duration;

	/// Suspend the calling task for `duration`.
	async fn sleep(&self, duration: Duration);

	fn now_secs(&self) -> u64 {
		self.now().as_secs()
	}
}

/// Wall clock backed by `SystemTime` and tokio timers.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
	fn now(&self) -> Duration {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default()
	}

	async fn sleep(&self, duration: Duration) {
		tokio::time::sleep(duration).await;
	}
}

/// Virtual clock: `sleep` advances time instantly and yields to the scheduler.
#[derive(Debug, Default)]
pub struct ManualClock {
	now: Mutex<Duration>,
}

impl ManualClock {
	pub fn new(start: Duration) -> Self {
		Self {
			now: Mutex::new(start),
		}
	}

	pub fn advance(&self, by: Duration) {
		let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
		*now += by;
	}
}

#[async_trait]
impl Clock for ManualClock {
	fn now(&self) -> Duration {
		*self.now.lock().unwrap_or_else(|e| e.into_inner())
	}

	async fn sleep(&self, duration: Duration) {
		self.advance(duration);
		tokio::task::yield_now().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn manual_clock_sleep_advances_time() {
		let clock = ManualClock::new(Duration::from_secs(60));
		clock.sleep(Duration::from_millis(1500)).await;
		assert_eq!(clock.now(), Duration::from_millis(61_500));
		assert_eq!(clock.now_secs(), 61);
	}
}
