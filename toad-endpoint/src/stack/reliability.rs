use std::collections::HashMap;
use std::fmt::Debug;
use std::net::SocketAddr;

use embedded_time::duration::Milliseconds;
use toad_msg::Type;

use super::{Cx, Layer, Timer};
use crate::config::Config;
use crate::exchange::{Exchange, Origin};
use crate::msg::Message;
use crate::req::Req;
use crate::resp::Resp;
use crate::retry::{Attempts, RetryTimer, YouShould};
use crate::time::{elapsed, Millis};

/// Timer tag of retransmission wake-ups
pub(crate) const RETRANSMIT: u8 = 0;

/// RFC 6298 bounds on the retransmission timeout
const MIN_RTO: u64 = 1_000;
const MAX_RTO: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resend {
  Request,
  Response,
}

/// Retransmission state of the CON message an exchange is waiting on
#[derive(Debug, Clone, Copy)]
pub(crate) struct Retransmission {
  pub(crate) timer: RetryTimer,
  pub(crate) resend: Resend,
  pub(crate) sent_at: Millis,
}

/// Decides how long to wait before retransmitting a CON message
pub trait RtoPolicy: Send + Debug {
  /// Timer for a CON message first sent to `peer` at `now`
  fn timer(&mut self, peer: SocketAddr, now: Millis, config: &Config) -> RetryTimer;

  /// The round-trip time to `peer` was measured on a message
  /// that took `attempts` transmissions to be acknowledged
  fn measured(&mut self, peer: SocketAddr, rtt: Millis, attempts: Attempts) {
    let _ = (peer, rtt, attempts);
  }
}

/// Initial timeout drawn from [`Con::ack_timeout`](crate::config::Con::ack_timeout),
/// doubled after every attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct Fixed;

impl RtoPolicy for Fixed {
  fn timer(&mut self, _: SocketAddr, now: Millis, config: &Config) -> RetryTimer {
    RetryTimer::new(now, config.msg.con.ack_timeout, config.msg.con.max_attempts)
  }
}

/// Smoothed round-trip time & variance (RFC 6298)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Estimate {
  srtt: u64,
  rttvar: u64,
}

impl Estimate {
  fn new(rtt: u64) -> Self {
    Self { srtt: rtt,
           rttvar: rtt / 2 }
  }

  fn update(&mut self, rtt: u64) {
    self.rttvar = (3 * self.rttvar + self.srtt.abs_diff(rtt)) / 4;
    self.srtt = (7 * self.srtt + rtt) / 8;
  }

  /// Start or update the estimate in `slot`
  fn sample(slot: &mut Option<Self>, rtt: u64) -> Self {
    let est = match *slot {
      | Some(mut est) => {
        est.update(rtt);
        est
      },
      | None => Self::new(rtt),
    };
    *slot = Some(est);
    est
  }

  fn rto(&self, k: u64) -> u64 {
    self.srtt + (k * self.rttvar).max(1)
  }
}

fn timer_with(init: u64, now: Millis, config: &Config) -> RetryTimer {
  RetryTimer::with_initial_delay(now,
                                 Milliseconds(init.clamp(MIN_RTO, MAX_RTO)),
                                 config.msg.con.ack_timeout,
                                 config.msg.con.max_attempts)
}

/// Per-peer RTO estimation from unambiguous round-trip samples (RFC 6298, Karn's algorithm)
#[derive(Debug, Clone, Default)]
pub struct BasicRto {
  peers: HashMap<SocketAddr, Estimate>,
}

impl RtoPolicy for BasicRto {
  fn timer(&mut self, peer: SocketAddr, now: Millis, config: &Config) -> RetryTimer {
    match self.peers.get(&peer) {
      | Some(est) => timer_with(est.rto(4), now, config),
      | None => Fixed.timer(peer, now, config),
    }
  }

  fn measured(&mut self, peer: SocketAddr, Milliseconds(rtt): Millis, attempts: Attempts) {
    if attempts > Attempts(1) {
      return;
    }

    self.peers
        .entry(peer)
        .and_modify(|est| est.update(rtt))
        .or_insert_with(|| Estimate::new(rtt));
  }
}

#[derive(Debug, Clone, Copy)]
struct CocoaPeer {
  strong: Option<Estimate>,
  weak: Option<Estimate>,
  overall: u64,
}

/// CoCoA congestion control: a strong estimator fed by clean samples,
/// a weak one fed by samples from retransmitted messages, blended
/// into one overall RTO per peer.
#[derive(Debug, Clone, Default)]
pub struct Cocoa {
  peers: HashMap<SocketAddr, CocoaPeer>,
}

impl Cocoa {
  /// Samples from messages needing more transmissions than this are discarded
  const MAX_WEAK_ATTEMPTS: u16 = 3;

  /// Overall RTO currently used for a peer
  pub fn rto(&self, peer: SocketAddr) -> Option<Millis> {
    self.peers.get(&peer).map(|p| Milliseconds(p.overall))
  }
}

impl RtoPolicy for Cocoa {
  fn timer(&mut self, peer: SocketAddr, now: Millis, config: &Config) -> RetryTimer {
    match self.peers.get(&peer) {
      | Some(p) => timer_with(p.overall, now, config),
      | None => Fixed.timer(peer, now, config),
    }
  }

  fn measured(&mut self, peer: SocketAddr, Milliseconds(rtt): Millis, attempts: Attempts) {
    if attempts.0 > Self::MAX_WEAK_ATTEMPTS {
      return;
    }

    let p = self.peers.entry(peer).or_insert(CocoaPeer { strong: None,
                                                         weak: None,
                                                         overall: 2_000 });

    if attempts == Attempts(1) {
      p.overall = (Estimate::sample(&mut p.strong, rtt).rto(4) + p.overall) / 2;
    } else {
      p.overall = (Estimate::sample(&mut p.weak, rtt).rto(1) + 3 * p.overall) / 4;
    }
  }
}

/// Makes CON messages reliable: retransmits them until acknowledged,
/// acknowledges CON responses, and maps ACK / RST back onto exchanges.
#[derive(Debug)]
pub struct Reliability<P> {
  policy: P,
}

impl<P: RtoPolicy> Reliability<P> {
  /// Create a reliability layer
  pub fn new(policy: P) -> Self {
    Self { policy }
  }

  /// The retransmission timeout policy
  pub fn policy(&self) -> &P {
    &self.policy
  }

  fn arm(&mut self, ex: &mut Exchange, peer: SocketAddr, resend: Resend, cx: &mut Cx<'_>) {
    let timer = self.policy.timer(peer, cx.now(), cx.config());
    ex.retransmission = Some(Retransmission { timer,
                                              resend,
                                              sent_at: cx.now() });
    cx.schedule(timer.next_attempt_at(), RETRANSMIT);
  }

  fn disarm(&mut self, ex: &mut Exchange, peer: SocketAddr, now: Millis) {
    if let Some(rt) = ex.retransmission.take() {
      self.policy
          .measured(peer, elapsed(rt.sent_at, now), rt.timer.attempts());
    }
  }

  fn resend(ex: &Exchange, resend: Resend, cx: &mut Cx<'_>) {
    match resend {
      | Resend::Request => match ex.current_request() {
        | Some(req) => cx.send_request(req.clone()),
        | None => log::warn!("exchange {} has no request to retransmit", ex.id()),
      },
      | Resend::Response => match ex.response() {
        | Some(resp) => cx.send_response(resp.clone()),
        | None => log::warn!("exchange {} has no response to retransmit", ex.id()),
      },
    }
  }
}

impl<P: RtoPolicy> Layer for Reliability<P> {
  fn send_request(&mut self, ex: &mut Exchange, req: Req, cx: &mut Cx<'_>) -> Option<Req> {
    if req.msg().ty == Type::Con {
      self.arm(ex, req.msg().peer, Resend::Request, cx);
    }
    Some(req)
  }

  fn send_response(&mut self, ex: &mut Exchange, mut resp: Resp, cx: &mut Cx<'_>) -> Option<Resp> {
    let request = ex.current_request()
                    .filter(|r| r.msg().ty == Type::Con && !ex.is_request_acknowledged())
                    .and_then(Req::msg_id);

    if resp.msg().ty == Type::Ack {
      match request {
        | Some(id) => resp.msg_mut().id = Some(id),
        | None => {
          log::debug!("request of exchange {} was already acknowledged; sending response as CON",
                      ex.id());
          resp.msg_mut().ty = Type::Con;
          resp.msg_mut().id = None;
        },
      }
    }

    match resp.msg().ty {
      | Type::Ack => ex.set_request_acknowledged(),
      | Type::Con => self.arm(ex, resp.msg().peer, Resend::Response, cx),
      | _ => (),
    }

    Some(resp)
  }

  fn send_empty(&mut self, ex: &mut Exchange, msg: Message, _: &mut Cx<'_>) -> Option<Message> {
    if msg.ty == Type::Ack && ex.origin() == Origin::Remote {
      ex.set_request_acknowledged();
    }
    Some(msg)
  }

  fn receive_response(&mut self,
                      ex: &mut Exchange,
                      resp: Resp,
                      cx: &mut Cx<'_>)
                      -> Option<Resp> {
    self.disarm(ex, resp.msg().peer, cx.now());
    ex.set_request_acknowledged();

    if resp.msg().ty == Type::Con {
      cx.send_empty(resp.msg().ack());
    }

    Some(resp)
  }

  fn receive_empty(&mut self,
                   ex: &mut Exchange,
                   msg: Message,
                   cx: &mut Cx<'_>)
                   -> Option<Message> {
    match msg.ty {
      | Type::Ack => {
        self.disarm(ex, msg.peer, cx.now());
        match ex.origin() {
          | Origin::Local => ex.set_request_acknowledged(),
          | Origin::Remote => {
            ex.set_response_acknowledged();
            if ex.response().map(|r| r.msg().is_last()).unwrap_or(false) {
              ex.set_complete();
            }
          },
        }
        None
      },
      | Type::Reset => {
        log::debug!("{} rejected exchange {}", msg.peer, ex.id());
        ex.retransmission = None;
        ex.set_rejected();
        ex.set_complete();
        cx.deliver_rejection();
        Some(msg)
      },
      | _ => None,
    }
  }

  fn on_timer(&mut self, ex: &mut Exchange, timer: Timer, cx: &mut Cx<'_>) {
    if timer.tag != RETRANSMIT || ex.is_complete() {
      return;
    }

    let mut rt = match ex.retransmission {
      // a newer message re-armed the exchange since this timer was scheduled
      | Some(rt) if rt.timer.next_attempt_at() == timer.at => rt,
      | _ => return,
    };

    match rt.timer.what_should_i_do(cx.now()) {
      | Ok(YouShould::Retry) => {
        log::debug!("retransmitting {:?} of exchange {} (attempt {})",
                    rt.resend,
                    ex.id(),
                    rt.timer.attempts().0);
        ex.retransmission = Some(rt);
        Self::resend(ex, rt.resend, cx);
        cx.schedule(rt.timer.next_attempt_at(), RETRANSMIT);
      },
      | Ok(YouShould::Cry) => {
        log::debug!("exchange {} timed out after {} attempts",
                    ex.id(),
                    rt.timer.attempts().0);
        ex.retransmission = None;
        ex.set_timed_out();
        ex.set_complete();
        cx.deliver_timeout();
      },
      | Err(nb::Error::WouldBlock) => {
        cx.schedule(rt.timer.next_attempt_at(), RETRANSMIT);
      },
      | Err(nb::Error::Other(never)) => match never {},
    }
  }
}
