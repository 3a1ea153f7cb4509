//! Time sources. The registry reads "now" through [`Clock`] so tests can pin
//! and advance time.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync + 'static {
  fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(at: DateTime<Utc>) -> Self { Self { now: Mutex::new(at) } }

  pub fn set(&self, at: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<C: Clock> Clock for Arc<C> {
  fn now(&self) -> DateTime<Utc> { (**self).now() }
}
