use std::net::SocketAddr;

use tinyvec::ArrayVec;
use toad_msg::Id;

use crate::msg::Message;

/// Identifies a message awaiting (or being) a link-layer reply:
/// (message id, peer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyMid {
  /// Message id
  pub id: Id,
  /// Peer address & port
  pub peer: SocketAddr,
}

impl KeyMid {
  /// Key of a message, `None` if its id has not been provisioned
  pub fn of(msg: &Message) -> Option<Self> {
    msg.id.map(|id| Self { id,
                           peer: msg.peer })
  }
}

/// Identifies an end-to-end request / response pairing:
/// (token, peer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyToken {
  /// Token bytes
  pub token: ArrayVec<[u8; 8]>,
  /// Peer address & port
  pub peer: SocketAddr,
}

impl KeyToken {
  /// Key of a message
  pub fn of(msg: &Message) -> Self {
    Self { token: msg.token.0,
           peer: msg.peer }
  }
}

/// Which body a blockwise transfer is moving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Continuation {
  /// The request body (Block1)
  Request,
  /// The response body (Block2)
  Response,
}

/// Identifies an in-progress blockwise transfer independent
/// of message ids & tokens: (resource, peer, direction)
///
/// Request-body and response-body transfers to the same resource
/// are tracked separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyUri {
  /// Path & query of the resource
  pub resource: String,
  /// Peer address & port
  pub peer: SocketAddr,
  /// See [`Continuation`]
  pub continuation: Continuation,
}

impl KeyUri {
  /// Key of a transfer of `continuation` for the resource targeted by `req`
  pub fn new(req: &Message, continuation: Continuation) -> Self {
    Self { resource: req.resource(),
           peer: req.peer,
           continuation }
  }

  /// Key an inbound request continues: its Block1 transfer if it has
  /// a Block1 option, otherwise its Block2 transfer.
  pub fn continued_by(req: &Message) -> Self {
    match req.block1() {
      | Some(_) => Self::new(req, Continuation::Request),
      | None => Self::new(req, Continuation::Response),
    }
  }
}

#[cfg(test)]
mod test {
  use toad_msg::Type;

  use super::*;
  use crate::msg::Block;
  use crate::req::Req;
  use crate::test;

  #[test]
  fn mid_requires_provisioned_id() {
    let mut req = Req::get(test::x.x.x.x(1), "a");
    assert_eq!(KeyMid::of(req.msg()), None);

    req.msg_mut().id = Some(Id(4));
    assert_eq!(KeyMid::of(req.msg()),
               Some(KeyMid { id: Id(4),
                             peer: test::x.x.x.x(1) }));
  }

  #[test]
  fn keys_distinguish_peers() {
    let mut a = Req::get(test::x.x.x.x(1), "a").into_msg();
    a.token = test::token(&[1]);
    a.id = Some(Id(1));
    let mut b = a.clone();
    b.peer = test::x.x.x.x(2);

    assert_ne!(KeyToken::of(&a), KeyToken::of(&b));
    assert_ne!(KeyMid::of(&a), KeyMid::of(&b));
    assert_ne!(KeyUri::continued_by(&a), KeyUri::continued_by(&b));
  }

  #[test]
  fn block1_and_block2_transfers_are_separate() {
    let mut put = Req::put(test::x.x.x.x(1), "fw").into_msg();
    put.set_block1(Block::new(0, true, 64));

    let mut get = Req::get(test::x.x.x.x(1), "fw").into_msg();
    get.ty = Type::Non;
    get.set_block2(Block::new(1, false, 64));

    assert_eq!(KeyUri::continued_by(&put).continuation, Continuation::Request);
    assert_eq!(KeyUri::continued_by(&get).continuation, Continuation::Response);
    assert_ne!(KeyUri::continued_by(&put), KeyUri::continued_by(&get));
  }
}
