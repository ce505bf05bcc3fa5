use std::collections::HashMap;

use crate::exchange::{ExchangeId, KeyMid};
use crate::msg::Message;
use crate::time::{elapsed, Millis};

#[derive(Debug, Clone)]
struct Seen {
  at: Millis,
  exchange: ExchangeId,
  reply: Option<Message>,
}

/// What to do with an inbound request
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Verdict {
  /// Never seen it
  New,
  /// Seen it before; here is the ACK or RST we answered it with
  Again(Option<Message>),
}

/// Recognizes requests a peer retransmitted (same message id)
/// so that they are answered again instead of processed again.
#[derive(Debug, Default)]
pub(crate) struct Deduplicator {
  seen: HashMap<KeyMid, Seen>,
}

impl Deduplicator {
  pub(crate) fn check(&self, key: &KeyMid) -> Verdict {
    match self.seen.get(key) {
      | Some(seen) => {
        log::debug!("{:?} duplicates a message on exchange {}", key, seen.exchange);
        Verdict::Again(seen.reply.clone())
      },
      | None => Verdict::New,
    }
  }

  pub(crate) fn insert(&mut self, key: KeyMid, exchange: ExchangeId, now: Millis) {
    self.seen.entry(key).or_insert(Seen { at: now,
                                          exchange,
                                          reply: None });
  }

  /// Remember the ACK or RST sent for the message `key`
  pub(crate) fn answered(&mut self, key: &KeyMid, reply: &Message) {
    if let Some(seen) = self.seen.get_mut(key) {
      seen.reply = Some(reply.clone());
    }
  }

  /// Forget messages older than `lifetime`
  pub(crate) fn purge(&mut self, now: Millis, lifetime: Millis) -> usize {
    let before = self.seen.len();
    self.seen.retain(|_, seen| elapsed(seen.at, now) < lifetime);
    before - self.seen.len()
  }

  pub(crate) fn clear(&mut self) {
    self.seen.clear();
  }
}

#[cfg(test)]
mod test {
  use embedded_time::duration::Milliseconds;
  use toad_msg::{Id, Type};

  use super::*;
  use crate::test;

  fn key(id: u16) -> KeyMid {
    KeyMid { id: Id(id),
             peer: test::x.x.x.x(1) }
  }

  #[test]
  fn remembers_replies() {
    let mut dedup = Deduplicator::default();
    assert_eq!(dedup.check(&key(1)), Verdict::New);

    dedup.insert(key(1), ExchangeId(1), Milliseconds(0));
    assert_eq!(dedup.check(&key(1)), Verdict::Again(None));

    let ack = Message::empty(Type::Ack, Id(1), test::x.x.x.x(1));
    dedup.answered(&key(1), &ack);
    assert_eq!(dedup.check(&key(1)), Verdict::Again(Some(ack)));
    assert_eq!(dedup.check(&key(2)), Verdict::New);
  }

  #[test]
  fn first_insert_wins() {
    let mut dedup = Deduplicator::default();
    dedup.insert(key(1), ExchangeId(1), Milliseconds(0));
    dedup.insert(key(1), ExchangeId(2), Milliseconds(5));
    assert_eq!(dedup.seen[&key(1)].exchange, ExchangeId(1));
  }

  #[test]
  fn purge() {
    let mut dedup = Deduplicator::default();
    dedup.insert(key(1), ExchangeId(1), Milliseconds(0));
    dedup.insert(key(2), ExchangeId(2), Milliseconds(500));

    assert_eq!(dedup.purge(Milliseconds(1_000), Milliseconds(1_000)), 1);
    assert_eq!(dedup.seen.len(), 1);
    assert_eq!(dedup.check(&key(1)), Verdict::New);
  }
}
