use embedded_time::duration::Milliseconds;

use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Which retransmission policy occupies the reliability slot
/// of the [`Stack`](crate::stack::Stack)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CongestionControl {
  /// Fixed timeouts; the initial retransmission timeout is drawn from
  /// [`Con::ack_timeout`] and doubled after every attempt
  Fixed,
  /// Estimate the retransmission timeout per peer from measured round-trip
  /// times ([RFC 6298](https://datatracker.ietf.org/doc/html/rfc6298))
  BasicRto,
  /// CoCoA: blend a "strong" estimator (RTTs of messages that were not
  /// retransmitted) with a "weak" estimator (RTTs of messages that were)
  /// ([draft-ietf-core-cocoa](https://datatracker.ietf.org/doc/html/draft-ietf-core-cocoa))
  Cocoa,
}

/// Configuration options related to outbound CON messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Con {
  /// Strategy used to pick the timeout before the first
  /// retransmission of a CON message that has not been
  /// acknowledged (`ACK_TIMEOUT` .. `ACK_TIMEOUT * ACK_RANDOM_FACTOR`).
  ///
  /// Defaults to an exponential strategy starting between 2 and 3 seconds:
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use toad_endpoint::config::Con;
  /// use toad_endpoint::retry::Strategy;
  ///
  /// assert_eq!(Con::default().ack_timeout,
  ///            Strategy::Exponential { init_min: Milliseconds(2_000),
  ///                                    init_max: Milliseconds(3_000) });
  /// ```
  pub ack_timeout: Strategy,
  /// Number of times a CON message may be transmitted
  /// (the original transmission plus `MAX_RETRANSMIT` retransmissions)
  /// before the exchange times out.
  ///
  /// Defaults to 5 attempts.
  /// ```
  /// use toad_endpoint::config::Con;
  /// use toad_endpoint::retry::Attempts;
  ///
  /// assert_eq!(Con::default().max_attempts, Attempts(5));
  /// ```
  pub max_attempts: Attempts,
}

impl Default for Con {
  fn default() -> Self {
    Con { ack_timeout: Strategy::Exponential { init_min: Milliseconds(2_000),
                                               init_max: Milliseconds(3_000) },
          max_attempts: Attempts(5) }
  }
}

/// Configuration options related to generating & sending messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg {
  /// Seed used to generate message [`Token`](toad_msg::Token)s
  /// and the first message [`Id`](toad_msg::Id),
  /// customizable to allow for your application to generate tokens
  /// less guessably.
  ///
  /// The default value is 0, although it is
  /// best practice to set this to something else.
  /// (random integer, machine identifier)
  ///
  /// ```
  /// use toad_endpoint::config::Msg;
  ///
  /// assert_eq!(Msg::default().token_seed, 0);
  /// ```
  pub token_seed: u16,

  /// See [`Con`]
  pub con: Con,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { token_seed: 0,
          con: Con::default() }
  }
}

/// Configuration options related to blockwise transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
  /// Block size we will fragment outbound bodies into, unless
  /// the peer asks for something smaller.
  ///
  /// Must be a power of two between 16 and 1024.
  ///
  /// ```
  /// use toad_endpoint::config::Block;
  ///
  /// assert_eq!(Block::default().preferred_size, 512);
  /// ```
  pub preferred_size: u16,
  /// Largest body we are willing to reassemble from
  /// Block1 fragments. Transfers exceeding this are answered
  /// with 4.13 Request Entity Too Large.
  ///
  /// ```
  /// use toad_endpoint::config::Block;
  ///
  /// assert_eq!(Block::default().max_body_size, 8192);
  /// ```
  pub max_body_size: usize,
}

impl Default for Block {
  fn default() -> Self {
    Block { preferred_size: 512,
            max_body_size: 8192 }
  }
}

/// Configuration options related to observe relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Observe {
  /// Every `n`th notification of a relation is sent CON
  /// (even if the application asked for NON) to check
  /// that the observer is still interested.
  ///
  /// ```
  /// use toad_endpoint::config::Observe;
  ///
  /// assert_eq!(Observe::default().notification_check_interval_count, 100);
  /// ```
  pub notification_check_interval_count: u32,
}

impl Default for Observe {
  fn default() -> Self {
    Observe { notification_check_interval_count: 100 }
  }
}

/// Configuration of the periodic "health" log line
/// reporting the size of the correlation tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Health {
  /// Level the health line is logged at
  ///
  /// ```
  /// use toad_endpoint::config::Health;
  ///
  /// assert_eq!(Health::default().level, log::Level::Debug);
  /// ```
  pub level: log::Level,
  /// Seconds between health lines. `0` disables the health task.
  ///
  /// ```
  /// use toad_endpoint::config::Health;
  ///
  /// assert_eq!(Health::default().interval_secs, 60);
  /// ```
  pub interval_secs: u64,
}

impl Default for Health {
  fn default() -> Self {
    Health { level: log::Level::Debug,
             interval_secs: 60 }
  }
}

/// Endpoint config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// See [`Msg`]
  pub msg: Msg,
  /// See [`Block`]
  pub block: Block,
  /// See [`Observe`]
  pub observe: Observe,
  /// See [`Health`]
  pub health: Health,
  /// Retransmission policy
  ///
  /// ```
  /// use toad_endpoint::config::{CongestionControl, Config};
  ///
  /// assert_eq!(Config::default().congestion_control, CongestionControl::Fixed);
  /// ```
  pub congestion_control: CongestionControl,
}

impl Default for Config {
  fn default() -> Self {
    Config { msg: Msg::default(),
             block: Block::default(),
             observe: Observe::default(),
             health: Health::default(),
             congestion_control: CongestionControl::Fixed }
  }
}

impl Config {
  /// Is an adaptive congestion control policy enabled?
  pub fn congestion_control_enabled(&self) -> bool {
    self.congestion_control != CongestionControl::Fixed
  }

  /// `MAX_TRANSMIT_SPAN`; the longest time from the first
  /// transmission of a CON message to its last retransmission
  pub fn max_transmit_span_millis(&self) -> u64 {
    self.msg
        .con
        .ack_timeout
        .max_time(Attempts(self.msg.con.max_attempts.0.saturating_sub(1)))
        .0
  }

  /// `MAX_LATENCY`
  pub fn max_latency_millis(&self) -> u64 {
    100_000
  }

  /// `PROCESSING_DELAY`
  pub fn expected_processing_delay_millis(&self) -> u64 {
    *self.msg.con.ack_timeout.range().start()
  }

  /// `EXCHANGE_LIFETIME`; how long an exchange may be
  /// remembered after it was started.
  ///
  /// ```
  /// use toad_endpoint::config::Config;
  ///
  /// assert_eq!(Config::default().exchange_lifetime_millis(), 247_000);
  /// ```
  pub fn exchange_lifetime_millis(&self) -> u64 {
    self.max_transmit_span_millis()
    + (2 * self.max_latency_millis())
    + self.expected_processing_delay_millis()
  }

  /// [`Config::exchange_lifetime_millis`] as a duration
  pub fn exchange_lifetime(&self) -> Millis {
    Milliseconds(self.exchange_lifetime_millis())
  }
}
