use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use toad_msg::{Id, Type};

use super::dedup::Deduplicator;
use crate::codec::Codec;
use crate::exchange::{Exchange, KeyMid, Origin};
use crate::interceptor::Interceptors;
use crate::logging::msg_summary;
use crate::matcher::Matcher;
use crate::msg::Message;
use crate::net::{Addrd, Connector};
use crate::req::Req;
use crate::resp::Resp;
use crate::stack::Outbox;

/// Hands out message ids, starting somewhere random
#[derive(Debug, Clone)]
pub(crate) struct MessageIds {
  next: u16,
}

impl MessageIds {
  pub(crate) fn new(seed: u64) -> Self {
    Self { next: ChaCha8Rng::seed_from_u64(seed).gen() }
  }

  pub(crate) fn next(&mut self) -> Id {
    let id = self.next;
    self.next = self.next.wrapping_add(1);
    Id(id)
  }
}

/// Serialize a message and give it to the connector,
/// unless an interceptor canceled it.
pub(crate) fn write(codec: &dyn Codec, connector: &dyn Connector, msg: &Message) {
  if msg.is_canceled() {
    log::debug!("not sending canceled {}", msg_summary(msg));
    return;
  }

  let bytes = match codec.serialize(msg) {
    | Ok(bytes) => bytes,
    | Err(e) => {
      log::error!("{} to {} could not be sent: {}", msg_summary(msg), msg.peer, e);
      return;
    },
  };

  if let Err(e) = nb::block!(connector.send(Addrd(&bytes[..], msg.peer))) {
    log::error!("sending {} to {} failed: {}", msg_summary(msg), msg.peer, e);
  }
}

/// The bottom of the stack: registers what leaves it with the
/// matcher, lets interceptors look at it and puts it on the wire.
#[derive(Debug)]
pub(crate) struct Transport<'a> {
  pub(crate) matcher: &'a Matcher,
  pub(crate) interceptors: &'a mut Interceptors,
  pub(crate) dedup: &'a mut Deduplicator,
  pub(crate) ids: &'a mut MessageIds,
  pub(crate) codec: &'a dyn Codec,
  pub(crate) connector: &'a dyn Connector,
}

impl<'a> Transport<'a> {
  fn provision(&mut self, msg: &mut Message) {
    if msg.id.is_none() {
      msg.id = Some(self.ids.next());
    }
  }

  /// The message id of the peer's request `msg` answers, and `msg` as it
  /// looked before interceptors saw it
  fn reply_to(ex: &Exchange, msg: &Message) -> Option<(KeyMid, Message)> {
    if ex.origin() != Origin::Remote || !matches!(msg.ty, Type::Ack | Type::Reset) {
      return None;
    }

    ex.current_request()
      .and_then(|r| KeyMid::of(r.msg()))
      .filter(|key| Some(key.id) == msg.id)
      .map(|key| (key, msg.clone()))
  }

  /// Remember how a peer's request was answered, in case it is retransmitted.
  ///
  /// Replies an interceptor canceled were never sent and are not remembered.
  fn answered(&mut self, reply: Option<(KeyMid, Message)>, sent: &Message) {
    match reply {
      | Some((key, reply)) if !sent.is_canceled() => self.dedup.answered(&key, &reply),
      | _ => (),
    }
  }
}

impl<'a> Outbox for Transport<'a> {
  fn send_request(&mut self, ex: &mut Exchange, mut req: Req) {
    self.provision(req.msg_mut());
    self.matcher.register_outbound_request(ex, &req);
    self.interceptors.send_request(&mut req);
    write(self.codec, self.connector, req.msg());
  }

  fn send_response(&mut self, ex: &mut Exchange, mut resp: Resp) {
    self.provision(resp.msg_mut());
    self.matcher.register_outbound_response(ex, &resp);
    let reply = Self::reply_to(ex, resp.msg());
    self.interceptors.send_response(&mut resp);
    self.answered(reply, resp.msg());
    write(self.codec, self.connector, resp.msg());
  }

  fn send_empty(&mut self, ex: &mut Exchange, mut msg: Message) {
    self.provision(&mut msg);
    self.matcher.register_outbound_empty(ex, &msg);
    let reply = Self::reply_to(ex, &msg);
    self.interceptors.send_empty(&mut msg);
    self.answered(reply, &msg);
    write(self.codec, self.connector, &msg);
  }
}
