//! Runtime state of an outbound relay
//!
//! The rotation cursor and the calendar-day counter are the only
//! frequently-mutated fields shared by every worker, so both live
//! behind mutexes and are only ever touched as an atomic
//! increment-and-read. Nothing here is cached per worker.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use volley_common::{address::EmailAddress, relay::RelayConfig};

use crate::error::ConfigurationError;

/// Calendar-day attempt counter with its last-reset date
///
/// The day tier deliberately uses a counter reset at the date boundary
/// rather than a rolling 24-hour window.
#[derive(Debug)]
struct DayCounter {
    date: NaiveDate,
    count: u64,
}

/// A registered relay plus its shared mutable state
#[derive(Debug)]
pub struct RelayHandle {
    pub config: RelayConfig,
    cursor: Mutex<usize>,
    day: Mutex<DayCounter>,
}

impl RelayHandle {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            cursor: Mutex::new(0),
            day: Mutex::new(DayCounter {
                date: Utc::now().date_naive(),
                count: 0,
            }),
        }
    }

    /// Take the next sender from the pool, advancing the cursor
    ///
    /// The read and the increment happen under one lock acquisition, so
    /// concurrent callers never observe the same pre-increment cursor.
    ///
    /// # Errors
    /// [`ConfigurationError::EmptySenderPool`] if the pool is empty.
    /// The pool is validated for syntactically valid addresses at parse
    /// time ([`EmailAddress`] cannot hold an invalid one), so an empty
    /// pool is the only failure left at rotation time.
    pub fn rotate_sender(&self) -> Result<EmailAddress, ConfigurationError> {
        let pool = &self.config.senders;
        if pool.is_empty() {
            return Err(ConfigurationError::EmptySenderPool(self.config.id));
        }

        let mut cursor = self.cursor.lock();
        let index = *cursor % pool.len();
        *cursor = cursor.wrapping_add(1);

        Ok(pool[index].clone())
    }

    /// Attempts charged to the calendar-day counter for `today`
    ///
    /// A date rollover resets the count to zero without waiting for the
    /// next increment.
    #[must_use]
    pub fn day_count(&self, today: NaiveDate) -> u64 {
        let day = self.day.lock();
        if day.date == today { day.count } else { 0 }
    }

    /// Charge one attempt to the day counter, returning the new count
    ///
    /// Resets at the calendar-day boundary; increment and read are one
    /// atomic operation under the lock.
    pub fn charge_day(&self, now: DateTime<Utc>) -> u64 {
        let today = now.date_naive();
        let mut day = self.day.lock();
        if day.date != today {
            day.date = today;
            day.count = 0;
        }
        day.count += 1;
        day.count
    }
}
