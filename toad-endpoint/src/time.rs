use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = embedded_time::duration::Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Read the clock, yielding the number of milliseconds
/// elapsed since the clock's epoch.
///
/// Exchanges and retransmission timers store times in this form
/// so that they do not need to be generic over the clock.
///
/// ```
/// use embedded_time::duration::Milliseconds;
/// use toad_endpoint::time;
///
/// let clock = toad_endpoint::std::Clock::new();
/// let Milliseconds(then) = time::now(&clock).unwrap();
/// let Milliseconds(now) = time::now(&clock).unwrap();
/// assert!(now >= then);
/// ```
pub fn now<C: Clock>(clock: &C) -> Result<Millis, embedded_time::clock::Error> {
  clock.try_now().and_then(since_epoch)
}

/// Convert an [`Instant`] to milliseconds since the clock's epoch
pub fn since_epoch<C: Clock>(instant: Instant<C>) -> Result<Millis, embedded_time::clock::Error> {
  Millis::try_from(instant.duration_since_epoch()).map_err(|_| {
                                                    embedded_time::clock::Error::Unspecified
                                                  })
}

/// Milliseconds elapsed between `then` and `now`, saturating at zero
/// when the clock appears to have gone backwards.
pub fn elapsed(then: Millis, now: Millis) -> Millis {
  Milliseconds(now.0.saturating_sub(then.0))
}

/// Timeout configuration allowing for "never time out" as an option
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub enum Timeout {
  /// Timeout after some number of milliseconds has elapsed
  Millis(u64),
  /// Never time out
  Never,
}

impl Timeout {
  /// Convert to a [`std::time::Duration`], `None` meaning "never"
  pub fn duration(&self) -> Option<::std::time::Duration> {
    match self {
      | Timeout::Millis(ms) => Some(::std::time::Duration::from_millis(*ms)),
      | Timeout::Never => None,
    }
  }
}
