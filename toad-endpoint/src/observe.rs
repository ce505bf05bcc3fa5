use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::exchange::{ExchangeId, KeyMid, KeyToken};
use crate::req::Req;

/// Observe sequence numbers are 24 bits wide
const SEQ_MASK: u32 = 0x00FF_FFFF;

/// A peer's registered interest in one of our resources.
///
/// Shared by the observe layer, which forgets it once it is canceled,
/// and the [`Exchange`](crate::exchange::Exchange) that established it.
#[derive(Debug)]
pub struct ObserveRelation {
  key: KeyToken,
  resource: String,
  exchange: ExchangeId,
  state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
  canceled: bool,
  seq: u32,
  sent: u32,
  notifications: VecDeque<KeyMid>,
}

impl ObserveRelation {
  pub(crate) fn new(exchange: ExchangeId, req: &Req) -> Self {
    Self { key: KeyToken::of(req.msg()),
           resource: req.msg().resource(),
           exchange,
           state: Default::default() }
  }

  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Token & address of the observer
  pub fn key(&self) -> KeyToken {
    self.key
  }

  /// Address of the observer
  pub fn peer(&self) -> SocketAddr {
    self.key.peer
  }

  /// Path & query of the observed resource
  pub fn resource(&self) -> &str {
    &self.resource
  }

  /// The exchange notifications are sent on
  pub fn exchange(&self) -> ExchangeId {
    self.exchange
  }

  /// Has the observer gone away (deregistered, RST a
  /// notification, or stopped acknowledging them)?
  pub fn is_canceled(&self) -> bool {
    self.state().canceled
  }

  pub(crate) fn cancel(&self) {
    let mut state = self.state();
    if !state.canceled {
      log::debug!("observe relation of {} on {} canceled",
                  self.key.peer,
                  self.resource);
      state.canceled = true;
    }
  }

  /// Allocate the Observe value of the next notification; the
  /// second element is whether it must be sent CON to check
  /// that the observer is still there.
  pub(crate) fn next_notification(&self, check_interval: u32) -> (u32, bool) {
    let mut state = self.state();
    state.seq = (state.seq + 1) & SEQ_MASK;
    state.sent = state.sent.wrapping_add(1);
    (state.seq, check_interval > 0 && state.sent % check_interval == 0)
  }

  /// Remember the key of a NON notification so it can be
  /// forgotten by the matcher once a newer CON/ACK supersedes it
  pub(crate) fn add_notification(&self, key: KeyMid) {
    self.state().notifications.push_back(key);
  }

  pub(crate) fn drain_notifications(&self) -> Vec<KeyMid> {
    self.state().notifications.drain(..).collect()
  }

  /// Number of NON notifications still correlatable with this relation
  pub fn pending_notifications(&self) -> usize {
    self.state().notifications.len()
  }
}

#[cfg(test)]
mod test {
  use toad_msg::Id;

  use super::*;
  use crate::test;

  fn relation() -> ObserveRelation {
    let mut req = Req::get(test::x.x.x.x(1), "temp");
    req.msg_mut().token = test::token(&[1]);
    req.msg_mut().set_observe(0);
    ObserveRelation::new(ExchangeId(3), &req)
  }

  #[test]
  fn every_nth_notification_is_checked() {
    let rel = relation();
    let checks = (0..10).map(|_| rel.next_notification(5).1)
                        .filter(|c| *c)
                        .count();
    assert_eq!(checks, 2);
  }

  #[test]
  fn sequence_increases() {
    let rel = relation();
    let (a, _) = rel.next_notification(0);
    let (b, _) = rel.next_notification(0);
    assert!(b > a);
  }

  #[test]
  fn notifications_drain() {
    let rel = relation();
    rel.add_notification(KeyMid { id: Id(1),
                                  peer: test::x.x.x.x(1) });
    rel.add_notification(KeyMid { id: Id(2),
                                  peer: test::x.x.x.x(1) });
    assert_eq!(rel.pending_notifications(), 2);
    assert_eq!(rel.drain_notifications().len(), 2);
    assert_eq!(rel.pending_notifications(), 0);
  }

  #[test]
  fn cancel() {
    let rel = relation();
    assert!(!rel.is_canceled());
    rel.cancel();
    rel.cancel();
    assert!(rel.is_canceled());
    assert_eq!(rel.resource(), "temp");
    assert_eq!(rel.exchange(), ExchangeId(3));
  }
}
