use std::net::SocketAddr;

use toad_msg::{Id, Token, Type};

use crate::msg::{Kind, Message};

/// Request methods
pub mod method;

#[doc(inline)]
pub use method::Method;

/// A CoAP request
///
/// ```
/// use toad_endpoint::req::{method, Req};
///
/// let peer = "127.0.0.1:5683".parse().unwrap();
/// let mut req = Req::post(peer, "greetings/hello");
/// req.msg_mut().set_payload("john".bytes());
///
/// assert_eq!(req.method(), method::POST);
/// assert_eq!(req.msg().path(), "greetings/hello");
/// assert_eq!(req.msg().ty, toad_msg::Type::Con);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Req(Message);

impl Req {
  /// Create a new confirmable request for a resource on a peer
  pub fn new(method: Method, peer: SocketAddr, path: impl AsRef<str>) -> Self {
    let mut msg = Message::new(Type::Con, method.0, peer);
    msg.set_path(path);
    Self(msg)
  }

  /// Create a GET request
  pub fn get(peer: SocketAddr, path: impl AsRef<str>) -> Self {
    Self::new(method::GET, peer, path)
  }

  /// Create a POST request
  pub fn post(peer: SocketAddr, path: impl AsRef<str>) -> Self {
    Self::new(method::POST, peer, path)
  }

  /// Create a PUT request
  pub fn put(peer: SocketAddr, path: impl AsRef<str>) -> Self {
    Self::new(method::PUT, peer, path)
  }

  /// Create a DELETE request
  pub fn delete(peer: SocketAddr, path: impl AsRef<str>) -> Self {
    Self::new(method::DELETE, peer, path)
  }

  /// Wrap a message, yielding `None` if its code is not a request code
  pub fn try_from_msg(msg: Message) -> Option<Self> {
    match msg.kind() {
      | Kind::Request => Some(Self(msg)),
      | _ => None,
    }
  }

  /// Make this request non-confirmable
  pub fn non(&mut self) {
    self.0.ty = Type::Non;
  }

  /// The request method
  pub fn method(&self) -> Method {
    Method(self.0.code)
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

  /// Is this an observe registration (GET with Observe: 0)?
  pub fn is_observe_register(&self) -> bool {
    self.method() == method::GET
    && self.0.observe() == Some(crate::msg::opt::OBSERVE_REGISTER)
  }

  /// Is this an observe deregistration (GET with Observe: 1)?
  pub fn is_observe_deregister(&self) -> bool {
    self.method() == method::GET
    && self.0.observe() == Some(crate::msg::opt::OBSERVE_DEREGISTER)
  }

  /// Does this request continue a blockwise transfer,
  /// i.e. does it carry a Block1 or Block2 option?
  pub fn has_continuation(&self) -> bool {
    self.0.block1().is_some() || self.0.block2().is_some()
  }
}

impl AsRef<Message> for Req {
  fn as_ref(&self) -> &Message {
    &self.0
  }
}

impl From<Req> for Message {
  fn from(req: Req) -> Self {
    req.0
  }
}
