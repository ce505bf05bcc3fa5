use toad_msg::{Code, Id, Token, Type};

use crate::msg::{Kind, Message};
use crate::req::Req;

/// Response codes
pub mod code;

/// A CoAP response
///
/// ```
/// use toad_endpoint::req::Req;
/// use toad_endpoint::resp::{code, Resp};
///
/// // pretend this is an incoming request
/// let mut req = Req::get("127.0.0.1:5683".parse().unwrap(), "hello");
/// req.msg_mut().id = Some(toad_msg::Id(1));
///
/// let mut resp = Resp::for_request(&req);
/// resp.set_code(code::CONTENT);
/// resp.msg_mut().set_payload("hi!".bytes());
///
/// // requests default to CON, so the response is a piggybacked ACK
/// // sharing the request's id & token.
/// assert_eq!(resp.msg().ty, toad_msg::Type::Ack);
/// assert_eq!(resp.msg().id, req.msg().id);
/// assert_eq!(resp.msg().token, req.msg().token);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Resp(Message);

impl Resp {
  /// Create a new response for a given request.
  ///
  /// If the request is CONfirmable, this will be a piggybacked ACK.
  ///
  /// If the request is NONconfirmable, this will be a NON.
  pub fn for_request(req: &Req) -> Self {
    let msg = req.msg();
    let ty = match msg.ty {
      | Type::Con => Type::Ack,
      | _ => Type::Non,
    };

    let mut resp = Message::new(ty, code::CONTENT, msg.peer);
    resp.token = msg.token;
    if ty == Type::Ack {
      resp.id = msg.id;
    }

    Self(resp)
  }

  /// Create a confirmable response that is not piggybacked on an ACK,
  /// e.g. a separate response or an observe notification.
  ///
  /// The token is copied from the request; the message id will be
  /// provisioned when the response is sent.
  pub fn con(req: &Req) -> Self {
    let mut resp = Message::new(Type::Con, code::CONTENT, req.msg().peer);
    resp.token = req.msg().token;
    Self(resp)
  }

  /// Create a non-confirmable response that is not piggybacked on an ACK
  pub fn non(req: &Req) -> Self {
    let mut resp = Self::con(req);
    resp.0.ty = Type::Non;
    resp
  }

  /// Wrap a message, yielding `None` if its code is not a response code
  pub fn try_from_msg(msg: Message) -> Option<Self> {
    match msg.kind() {
      | Kind::Response => Some(Self(msg)),
      | _ => None,
    }
  }

  /// Response code
  pub fn code(&self) -> Code {
    self.0.code
  }

  /// Change the response code
  pub fn set_code(&mut self, code: Code) {
    self.0.code = code;
  }

  /// Message id, if one has been provisioned
  pub fn msg_id(&self) -> Option<Id> {
    self.0.id
  }

  /// Message token
  pub fn msg_token(&self) -> Token {
    self.0.token
  }

  /// Obtain a reference to the inner message
  pub fn msg(&self) -> &Message {
    &self.0
  }

  /// Obtain a mutable reference to the inner message
  pub fn msg_mut(&mut self) -> &mut Message {
    &mut self.0
  }

  /// Unwrap the inner message
  pub fn into_msg(self) -> Message {
    self.0
  }

  /// Is this response an observe notification (does it carry Observe)?
  pub fn is_notification(&self) -> bool {
    self.0.observe().is_some()
  }

  /// Does this response have more blocks to follow?
  pub fn has_continuation(&self) -> bool {
    self.0.block2().map(|b| b.more).unwrap_or(false)
  }
}

impl AsRef<Message> for Resp {
  fn as_ref(&self) -> &Message {
    &self.0
  }
}

impl From<Resp> for Message {
  fn from(resp: Resp) -> Self {
    resp.0
  }
}
