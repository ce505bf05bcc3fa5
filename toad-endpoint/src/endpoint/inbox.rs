use std::fmt::{self, Debug};
use std::sync::Weak;

use toad_msg::Type;

use super::dedup::Verdict;
use super::{outbox, Core, Shared};
use crate::codec::{expects_reply, Parsed};
use crate::exchange::KeyMid;
use crate::logging::msg_summary;
use crate::msg::{Kind, Message};
use crate::net::{Addrd, InboundChannel};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::{elapsed, Clock, Millis};

/// Hands datagrams from the connector to the endpoint's executor
pub(super) struct Inbox<Clk>(pub(super) Weak<Shared<Clk>>);

impl<Clk> Debug for Inbox<Clk> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Inbox").field(&self.0.strong_count()).finish()
  }
}

impl<Clk> InboundChannel for Inbox<Clk> where Clk: Clock + Send + Sync + 'static
{
  fn receive(&self, data: Addrd<Vec<u8>>) {
    let shared = match self.0.upgrade() {
      | Some(shared) => shared,
      | None => return,
    };

    let peer = data.addr();
    if let Err(e) = shared.submit(move |s| s.receive(data)) {
      log::warn!("dropping datagram from {}: {}", peer, e);
    }
  }
}

impl<Clk> Shared<Clk> where Clk: Clock + Send + Sync + 'static
{
  fn receive(&self, data: Addrd<Vec<u8>>) {
    let now = match self.now() {
      | Some(now) => now,
      | None => return,
    };

    let mut core = self.core();
    match core.codec.parse(data.data(), data.addr()) {
      | Parsed::Request(msg) => match Req::try_from_msg(msg) {
        | Some(req) => self.receive_request(&mut core, req, now),
        | None => log::warn!("codec produced a request that is not one"),
      },
      | Parsed::Response(msg) => match Resp::try_from_msg(msg) {
        | Some(resp) => self.receive_response(&mut core, resp, now),
        | None => log::warn!("codec produced a response that is not one"),
      },
      | Parsed::Empty(msg) if msg.is_ping() => {
        log::debug!("answering ping {:?} from {} with RST", msg.id, msg.peer);
        let rst = msg.reset();
        self.reject(&mut core, rst);
      },
      | Parsed::Empty(msg) => self.receive_empty(&mut core, msg, now),
      | Parsed::Malformed { id,
                            request_shaped: true, } => {
        log::debug!("rejecting malformed request {:?} from {}", id, data.addr());
        self.reject(&mut core, Message::empty(Type::Reset, id, data.addr()));
      },
      | Parsed::Malformed { id, .. } => {
        log::debug!("discarding malformed message {:?} from {}", id, data.addr())
      },
      | Parsed::Unrecognized => {
        log::debug!("discarding {} bytes of garbage from {}",
                    data.data().len(),
                    data.addr())
      },
    }
  }

  /// Send an empty message that belongs to no exchange
  fn reject(&self, core: &mut Core, mut msg: Message) {
    core.interceptors.send_empty(&mut msg);
    outbox::write(core.codec.as_ref(), self.connector.as_ref(), &msg);
  }

  /// Send the reply remembered for a retransmitted request again
  fn replay(&self, core: &mut Core, reply: Message) {
    match reply.kind() {
      | Kind::Response => {
        if let Some(mut resp) = Resp::try_from_msg(reply) {
          core.interceptors.send_response(&mut resp);
          outbox::write(core.codec.as_ref(), self.connector.as_ref(), resp.msg());
        }
      },
      | _ => self.reject(core, reply),
    }
  }

  fn receive_request(&self, core: &mut Core, mut req: Req, now: Millis) {
    core.interceptors.receive_request(&mut req);
    if req.msg().is_canceled() {
      log::debug!("interceptor canceled inbound {}", msg_summary(req.msg()));
      return;
    }

    let key = KeyMid::of(req.msg());
    if let Some(key) = key {
      match core.dedup.check(&key) {
        | Verdict::New => (),
        | Verdict::Again(Some(reply)) => {
          log::debug!("answering duplicate {} again", msg_summary(req.msg()));
          self.replay(core, reply);
          return;
        },
        | Verdict::Again(None) => {
          log::debug!("ignoring duplicate {}; not answered yet",
                      msg_summary(req.msg()));
          return;
        },
      }
    }

    let id = core.matcher.correlate_inbound_request(&req, now);
    if let Some(key) = key {
      core.dedup.insert(key, id, now);
    }

    let local = self.connector.local_addr();
    self.traverse(core, id, now, |stack, ex, cx, out| {
          ex.set_local_addr(local);
          ex.set_current_request(req.clone());
          stack.receive_request(ex, req, cx, out)
        });
  }

  fn receive_response(&self, core: &mut Core, mut resp: Resp, now: Millis) {
    core.interceptors.receive_response(&mut resp);
    if resp.msg().is_canceled() {
      log::debug!("interceptor canceled inbound {}", msg_summary(resp.msg()));
      return;
    }

    match core.matcher.correlate_inbound_response(&resp) {
      | Some(id) => {
        self.traverse(core, id, now, |stack, ex, cx, out| {
              resp.msg_mut().set_rtt(elapsed(ex.timestamp(), now));
              stack.receive_response(ex, resp, cx, out)
            });
      },
      | None if !expects_reply(resp.msg().ty) => {
        log::debug!("dropping {} that answers nothing", msg_summary(resp.msg()))
      },
      | None => {
        log::debug!("rejecting {} that answers nothing", msg_summary(resp.msg()));
        let rst = resp.msg().reset();
        self.reject(core, rst);
      },
    }
  }

  fn receive_empty(&self, core: &mut Core, mut msg: Message, now: Millis) {
    core.interceptors.receive_empty(&mut msg);
    if msg.is_canceled() {
      log::debug!("interceptor canceled inbound {}", msg_summary(&msg));
      return;
    }

    match core.matcher.correlate_inbound_empty(&msg) {
      | Some(id) => {
        self.traverse(core, id, now, |stack, ex, cx, out| {
              stack.receive_empty(ex, msg, cx, out)
            });
      },
      | None => log::trace!("{} refers to no exchange", msg_summary(&msg)),
    }
  }
}
