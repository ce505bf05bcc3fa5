use std::collections::BTreeMap;
use std::net::SocketAddr;

use toad_msg::{Code, Id, Token, Type};

use crate::time::Millis;

/// Known options & option value helpers
pub mod opt;

#[doc(inline)]
pub use opt::Block;

/// Whether a message is a request, a response or empty,
/// inferred from its code class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
  /// Code 0.00
  Empty,
  /// Code class 0 with non-zero detail
  Request,
  /// Code class 2, 4 or 5
  Response,
  /// Reserved code classes (1, 3, 6, 7)
  Reserved,
}

impl Kind {
  /// Classify a message code
  pub fn of(code: Code) -> Self {
    match (code.class, code.detail) {
      | (0, 0) => Kind::Empty,
      | (0, _) => Kind::Request,
      | (2, _) | (4, _) | (5, _) => Kind::Response,
      | _ => Kind::Reserved,
    }
  }
}

/// Code of empty messages (ACK, RST, ping)
pub const EMPTY: Code = Code::new(0, 0);

/// A CoAP message addressed to (outbound) or received from (inbound) a peer.
///
/// Requests and responses are usually handled through the [`Req`](crate::req::Req)
/// and [`Resp`](crate::resp::Resp) wrappers; empty messages (ACK, RST, ping)
/// are handled as bare `Message`s.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Code`] for details
  pub code: Code,
  /// Message id; `None` until one is provisioned by the endpoint
  /// just before the message is handed to the transport.
  pub id: Option<Id>,
  /// see [`Token`] for details
  pub token: Token,
  /// Options, keyed by option number
  pub opts: BTreeMap<u32, Vec<Vec<u8>>>,
  /// Message body
  pub payload: Vec<u8>,
  /// Destination of outbound messages, source of inbound messages
  pub peer: SocketAddr,
  meta: Meta,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Meta {
  canceled: bool,
  continues: bool,
  rtt: Option<Millis>,
}

impl Message {
  /// Create a message with no token, options or payload
  pub fn new(ty: Type, code: Code, peer: SocketAddr) -> Self {
    Self { ty,
           code,
           id: None,
           token: Token(Default::default()),
           opts: Default::default(),
           payload: Default::default(),
           peer,
           meta: Default::default() }
  }

  /// Create an empty message (code 0.00)
  pub fn empty(ty: Type, id: Id, peer: SocketAddr) -> Self {
    Self { id: Some(id),
           ..Self::new(ty, EMPTY, peer) }
  }

  /// Create an empty CON message, "CoAP ping"
  pub fn ping(peer: SocketAddr) -> Self {
    Self::new(Type::Con, EMPTY, peer)
  }

  /// Create an empty ACK for this message
  pub fn ack(&self) -> Self {
    Self { id: self.id,
           ..Self::new(Type::Ack, EMPTY, self.peer) }
  }

  /// Create an empty RST rejecting this message
  pub fn reset(&self) -> Self {
    Self { id: self.id,
           ..Self::new(Type::Reset, EMPTY, self.peer) }
  }

  /// See [`Kind`]
  pub fn kind(&self) -> Kind {
    Kind::of(self.code)
  }

  /// Is this an empty CON or NON message?
  pub fn is_ping(&self) -> bool {
    self.kind() == Kind::Empty && matches!(self.ty, Type::Con | Type::Non)
  }

  /// Token bytes
  pub fn token_bytes(&self) -> &[u8] {
    &self.token.0
  }

  /// Mark this message as canceled; it will not be sent or processed further.
  ///
  /// This is how interceptors truncate the send & receive paths.
  pub fn cancel(&mut self) {
    self.meta.canceled = true;
  }

  /// See [`Message::cancel`]
  pub fn is_canceled(&self) -> bool {
    self.meta.canceled
  }

  /// Round-trip time from the start of the exchange to the
  /// receipt of this (response) message
  pub fn rtt(&self) -> Option<Millis> {
    self.meta.rtt
  }

  pub(crate) fn set_rtt(&mut self, rtt: Millis) {
    self.meta.rtt = Some(rtt);
  }

  /// Is this the terminal message of its exchange?
  ///
  /// Intermediate blockwise fragments and observe notifications
  /// are not; more messages will follow them in the same exchange.
  pub fn is_last(&self) -> bool {
    !self.meta.continues
  }

  /// See [`Message::is_last`]
  pub fn set_last(&mut self, last: bool) {
    self.meta.continues = !last;
  }

  /// Get all values of an option
  pub fn get(&self, number: u32) -> Option<&Vec<Vec<u8>>> {
    self.opts.get(&number)
  }

  /// Get the first value of an option
  pub fn get_first(&self, number: u32) -> Option<&[u8]> {
    self.get(number)
        .and_then(|vals| vals.first())
        .map(|v| v.as_slice())
  }

  /// Replace all values of an option with a single value
  pub fn set(&mut self, number: u32, value: impl IntoIterator<Item = u8>) {
    self.opts.insert(number, vec![value.into_iter().collect()]);
  }

  /// Add a value to a repeatable option
  pub fn add(&mut self, number: u32, value: impl IntoIterator<Item = u8>) {
    self.opts
        .entry(number)
        .or_default()
        .push(value.into_iter().collect());
  }

  /// Remove all values of an option
  pub fn remove(&mut self, number: u32) -> Option<Vec<Vec<u8>>> {
    self.opts.remove(&number)
  }

  /// Replace the payload
  pub fn set_payload(&mut self, payload: impl IntoIterator<Item = u8>) {
    self.payload = payload.into_iter().collect();
  }

  /// Payload as utf8
  pub fn payload_str(&self) -> Result<&str, core::str::Utf8Error> {
    core::str::from_utf8(&self.payload)
  }
}
