use core::ops::RangeInclusive;

use embedded_time::duration::Milliseconds;
use rand::{Rng, SeedableRng};

use crate::time::Millis;

/// A non-blocking retransmission timer that lives alongside the
/// message it is retransmitting.
///
/// The timer does not own the message or wake itself up; the owner
/// asks when the next attempt is due ([`RetryTimer::next_attempt_at`]),
/// schedules a wake-up for then, and asks the timer what to do once it
/// fires.
///
/// ```
/// use embedded_time::duration::Milliseconds;
/// use toad_endpoint::retry::{Attempts, RetryTimer, Strategy, YouShould};
///
/// let strategy = Strategy::Delay { min: Milliseconds(100),
///                                  max: Milliseconds(100) };
/// let mut retry = RetryTimer::new(Milliseconds(0), strategy, Attempts(2));
///
/// assert_eq!(retry.next_attempt_at(), Milliseconds(100u64));
/// assert_eq!(retry.what_should_i_do(Milliseconds(50)),
///            Err(nb::Error::WouldBlock));
/// assert_eq!(retry.what_should_i_do(Milliseconds(100)), Ok(YouShould::Retry));
/// assert_eq!(retry.what_should_i_do(Milliseconds(1_000)), Ok(YouShould::Cry));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTimer {
  start: Millis,
  init: Millis,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

/// A number of attempts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attempts(pub u16);

/// Result of [`RetryTimer.what_should_i_do`].
///
/// This tells you if a retry should be attempted or not.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted and the work that is
  /// being retried should be considered poisoned.
  Cry,
  /// A retry should be performed
  Retry,
}

impl RetryTimer {
  /// Create a new retrier with an initial delay drawn from the strategy's range
  pub fn new(start: Millis, strategy: Strategy, max_attempts: Attempts) -> Self {
    let init = if strategy.has_jitter() {
      let mut rand = rand_chacha::ChaCha8Rng::seed_from_u64(start.0);
      Milliseconds(rand.gen_range(strategy.range()))
    } else {
      Milliseconds(*strategy.range().start())
    };

    Self::with_initial_delay(start, init, strategy, max_attempts)
  }

  /// Create a new retrier with a known initial delay
  /// (e.g. a retransmission timeout estimated from round-trip times)
  pub fn with_initial_delay(start: Millis,
                            init: Millis,
                            strategy: Strategy,
                            max_attempts: Attempts)
                            -> Self {
    Self { start,
           init,
           strategy,
           max_attempts,
           attempts: Attempts(1) }
  }

  /// When the thing we keep trying fails, invoke this to
  /// tell the retrytimer "it failed again! what do I do??"
  ///
  /// Returns `nb::Error::WouldBlock` when we have not yet
  /// waited the appropriate amount of time to retry.
  pub fn what_should_i_do(&mut self,
                          now: Millis)
                          -> nb::Result<YouShould, core::convert::Infallible> {
    if self.attempts >= self.max_attempts {
      Ok(YouShould::Cry)
    } else if self.is_ready(crate::time::elapsed(self.start, now), self.attempts.0) {
      self.attempts.0 += 1;
      Ok(YouShould::Retry)
    } else {
      Err(nb::Error::WouldBlock)
    }
  }

  /// The moment at which the next attempt (or the verdict
  /// that attempts are exhausted) becomes due
  pub fn next_attempt_at(&self) -> Millis {
    Milliseconds(self.start.0 + self.total_delay(self.attempts.0))
  }

  /// The number of attempts made so far, including the first
  pub fn attempts(&self) -> Attempts {
    self.attempts
  }

  /// The delay before the first retry
  pub fn initial_delay(&self) -> Millis {
    self.init
  }

  /// Check if the strategy says an appropriate time has passed
  pub fn is_ready(&self, Milliseconds(time_passed): Millis, attempts: u16) -> bool {
    attempts == 0 || time_passed >= self.total_delay(attempts)
  }

  fn total_delay(&self, attempts: u16) -> u64 {
    match self.strategy {
      | Strategy::Delay { .. } => self.init.0 * attempts as u64,
      | Strategy::Exponential { .. } => Strategy::total_delay_exp(self.init, attempts),
    }
  }
}

/// Strategy to employ when retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Generate a random delay between `min` and `max`,
  /// and wait until this delay has passed between attempts.
  ///
  /// After each failed attempt, double the delay before retrying again.
  Exponential {
    /// Minimum (inclusive) delay for second attempt
    init_min: Millis,
    /// Maximum (inclusive) delay for second attempt
    init_max: Millis,
  },
  /// Generate a random delay between `min` and `max`,
  /// and wait until this delay has passed between attempts.
  Delay {
    /// Minimum (inclusive) delay for attempts
    min: Millis,
    /// Maximum (inclusive) delay for attempts
    max: Millis,
  },
}

impl Strategy {
  /// Are min & max delays the same? if so, we should probably skip the random number generation.
  pub fn has_jitter(&self) -> bool {
    let rng = self.range();
    rng.start() != rng.end()
  }

  /// Get the min & max durations as an inclusive range
  pub fn range(&self) -> RangeInclusive<u64> {
    match self {
      | &Self::Delay { min: Milliseconds(min),
                       max: Milliseconds(max), } => (min..=max),

      | &Self::Exponential { init_min: Milliseconds(min),
                             init_max: Milliseconds(max), } => (min..=max),
    }
  }

  /// Get the amount of time this strategy will take if all attempts fail
  pub fn max_time(&self, max_attempts: Attempts) -> Millis {
    Milliseconds(match self {
                   | Self::Exponential { init_max, .. } => {
                     Self::total_delay_exp(*init_max, max_attempts.0)
                   },
                   | Self::Delay { max: Milliseconds(max),
                                   .. } => max * max_attempts.0 as u64,
                 })
  }

  /// Given the initial delay and number of attempts that have been performed,
  /// yields the total delay from the first attempt until the next one.
  const fn total_delay_exp(Milliseconds(init): Millis, attempt: u16) -> u64 {
    // | attempt | total delay      |
    // | 1       | init             |
    // | 2       | init * 3         |
    // | 3       | init * 7         |
    // | ...     | ...              |
    // | n       | init * (2^n - 1) |
    init * (2u64.pow(attempt as u32) - 1)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn delay_retrier() {
    let mut retry = RetryTimer::new(Milliseconds(0),
                                    Strategy::Delay { min: Milliseconds(1000),
                                                      max: Milliseconds(1000) },
                                    Attempts(5));

    // attempt 1 happens before asking what_should_i_do

    assert_eq!(retry.what_should_i_do(Milliseconds(999)).unwrap_err(),
               nb::Error::WouldBlock);
    assert_eq!(retry.what_should_i_do(Milliseconds(1000)).unwrap(),
               YouShould::Retry);
    // attempt 2

    assert_eq!(retry.next_attempt_at(), Milliseconds(2000u64));
    assert_eq!(retry.what_should_i_do(Milliseconds(1999)).unwrap_err(),
               nb::Error::WouldBlock);
    assert_eq!(retry.what_should_i_do(Milliseconds(2000)).unwrap(),
               YouShould::Retry);
    // attempt 3

    assert_eq!(retry.what_should_i_do(Milliseconds(10_000)).unwrap(),
               YouShould::Retry);
    // attempt 4
    assert_eq!(retry.what_should_i_do(Milliseconds(10_000)).unwrap(),
               YouShould::Retry);
    // attempt 5

    assert_eq!(retry.what_should_i_do(Milliseconds(10_000)).unwrap(),
               YouShould::Cry);
  }

  #[test]
  fn exponential_retrier() {
    let mut retry = RetryTimer::new(Milliseconds(0),
                                    Strategy::Exponential { init_min: Milliseconds(100),
                                                            init_max: Milliseconds(100) },
                                    Attempts(3));

    assert_eq!(retry.next_attempt_at(), Milliseconds(100u64));
    assert_eq!(retry.what_should_i_do(Milliseconds(100)).unwrap(),
               YouShould::Retry);

    // 100 + 200
    assert_eq!(retry.next_attempt_at(), Milliseconds(300u64));
    assert_eq!(retry.what_should_i_do(Milliseconds(299)).unwrap_err(),
               nb::Error::WouldBlock);
    assert_eq!(retry.what_should_i_do(Milliseconds(300)).unwrap(),
               YouShould::Retry);

    assert_eq!(retry.what_should_i_do(Milliseconds(300)).unwrap(),
               YouShould::Cry);
  }

  #[test]
  fn jitter_stays_within_range() {
    let strategy = Strategy::Exponential { init_min: Milliseconds(2000),
                                           init_max: Milliseconds(3000) };
    for start in 0..32 {
      let retry = RetryTimer::new(Milliseconds(start * 7919), strategy, Attempts(4));
      assert!(strategy.range().contains(&retry.initial_delay().0));
    }
  }

  #[test]
  fn max_time() {
    let exp = Strategy::Exponential { init_min: Milliseconds(1),
                                      init_max: Milliseconds(10) };
    assert_eq!(exp.max_time(Attempts(3)), Milliseconds(70u64));

    let delay = Strategy::Delay { min: Milliseconds(1),
                                  max: Milliseconds(10) };
    assert_eq!(delay.max_time(Attempts(3)), Milliseconds(30u64));
  }
}
