use std::collections::HashMap;
use std::sync::Arc;

use toad_msg::Type;

use super::{Cx, Layer};
use crate::exchange::{Exchange, KeyToken, Origin};
use crate::msg::opt::known;
use crate::msg::Message;
use crate::observe::ObserveRelation;
use crate::req::Req;
use crate::resp::{code, Resp};
use crate::time::{elapsed, Millis};

/// Orders the notifications an observing client receives (RFC 7641 section 3.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NotificationOrder {
  seq: u32,
  at: Millis,
}

impl NotificationOrder {
  /// After this long any notification is considered fresh
  const FRESHNESS_MILLIS: u64 = 128_000;

  pub(crate) fn new(seq: u32, at: Millis) -> Self {
    Self { seq, at }
  }

  /// Is a notification numbered `seq` received at `now` newer than the last one?
  pub(crate) fn is_newer(&self, seq: u32, now: Millis) -> bool {
    const HALF: u32 = 1 << 23;
    let last = self.seq;

    (last < seq && seq - last < HALF)
    || (last > seq && last - seq > HALF)
    || elapsed(self.at, now).0 > Self::FRESHNESS_MILLIS
  }
}

/// Server side: establishes observe relations, numbers the notifications
/// sent on them and tears them down.
///
/// Client side: drops notifications that arrive out of order.
#[derive(Debug, Default)]
pub struct Observe {
  relations: HashMap<KeyToken, Arc<ObserveRelation>>,
}

impl Observe {
  /// Number of live observe relations
  pub fn relations(&self) -> usize {
    self.relations.values().filter(|r| !r.is_canceled()).count()
  }

  fn forget(&mut self, rel: &ObserveRelation) {
    let ours = self.relations
                   .get(&rel.key())
                   .map(|r| r.exchange() == rel.exchange())
                   .unwrap_or(false);
    if ours {
      self.relations.remove(&rel.key());
    }
  }

  fn register(&mut self, ex: &mut Exchange, req: &Req, cx: &mut Cx<'_>) {
    let key = KeyToken::of(req.msg());
    if let Some(old) = self.relations.remove(&key) {
      old.cancel();
      cx.complete_later(old.exchange());
    }

    let rel = Arc::new(ObserveRelation::new(ex.id(), req));
    log::debug!("{} now observes {}", rel.peer(), rel.resource());
    ex.set_relation(rel.clone());
    self.relations.insert(key, rel);
  }
}

impl Layer for Observe {
  fn receive_request(&mut self, ex: &mut Exchange, req: Req, cx: &mut Cx<'_>) -> Option<Req> {
    if ex.origin() != Origin::Remote {
      return Some(req);
    }

    self.relations.retain(|_, r| !r.is_canceled());

    if req.is_observe_register() && ex.relation().is_none() {
      self.register(ex, &req, cx);
    } else if req.is_observe_deregister() {
      if let Some(old) = self.relations.remove(&KeyToken::of(req.msg())) {
        old.cancel();
        cx.complete_later(old.exchange());
      }
    }

    Some(req)
  }

  fn send_response(&mut self, ex: &mut Exchange, mut resp: Resp, cx: &mut Cx<'_>) -> Option<Resp> {
    let rel = match ex.relation() {
      | Some(rel) => rel,
      | None => return Some(resp),
    };

    if rel.is_canceled() || !code::is_success(resp.code()) {
      rel.cancel();
      self.forget(&rel);
      resp.msg_mut().remove(known::OBSERVE);
      resp.msg_mut().set_last(true);
      return Some(resp);
    }

    let check_every = cx.config().observe.notification_check_interval_count;
    let (seq, check) = rel.next_notification(check_every);
    resp.msg_mut().set_observe(seq);
    resp.msg_mut().set_last(false);

    if check && resp.msg().ty == Type::Non {
      log::trace!("checking that {} is still interested in {}",
                  rel.peer(),
                  rel.resource());
      resp.msg_mut().ty = Type::Con;
    }

    Some(resp)
  }

  fn receive_response(&mut self,
                      ex: &mut Exchange,
                      resp: Resp,
                      cx: &mut Cx<'_>)
                      -> Option<Resp> {
    let seq = match resp.msg().observe() {
      | Some(seq) if ex.is_observing() => seq,
      | _ => return Some(resp),
    };

    match ex.notification_order {
      | Some(order) if !order.is_newer(seq, cx.now()) => {
        log::debug!("dropping out-of-order notification {} on exchange {}",
                    seq,
                    ex.id());
        None
      },
      | _ => {
        ex.notification_order = Some(NotificationOrder::new(seq, cx.now()));
        Some(resp)
      },
    }
  }

  fn receive_empty(&mut self,
                   ex: &mut Exchange,
                   msg: Message,
                   _: &mut Cx<'_>)
                   -> Option<Message> {
    if msg.ty == Type::Reset {
      if let Some(rel) = ex.relation() {
        rel.cancel();
        self.forget(&rel);
      }
    }
    Some(msg)
  }
}
