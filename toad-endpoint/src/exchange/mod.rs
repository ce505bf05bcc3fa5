use std::fmt::{self, Debug};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::observe::ObserveRelation;
use crate::req::Req;
use crate::resp::Resp;
use crate::stack::blockwise::BlockStatus;
use crate::stack::observe::NotificationOrder;
use crate::stack::reliability::Retransmission;
use crate::time::Millis;

/// Correlation keys
pub mod key;

#[doc(inline)]
pub use key::{Continuation, KeyMid, KeyToken, KeyUri};

/// Opaque, endpoint-unique identity of an [`Exchange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeId(pub(crate) u64);

impl fmt::Display for ExchangeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Which side started an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
  /// We sent the request
  Local,
  /// A peer sent the request
  Remote,
}

/// Notified exactly once when an [`Exchange`] completes
pub trait ExchangeObserver: Send + Sync + Debug {
  /// The exchange completed (was answered, timed out, rejected or canceled)
  fn completed(&self, exchange: &Exchange);
}

/// One logical request/response interaction, spanning
/// every message belonging to it (retransmissions, blockwise
/// fragments, observe notifications).
///
/// Exchanges are owned by the endpoint and lent to the layer
/// pipeline while a message involving them is processed;
/// application code sees them by reference through the
/// [`Deliverer`](crate::deliver::Deliverer).
#[derive(Debug)]
pub struct Exchange {
  id: ExchangeId,
  origin: Origin,
  timestamp: Millis,
  local_addr: Option<SocketAddr>,
  request: Option<Req>,
  current_request: Option<Req>,
  response: Option<Resp>,
  relation: Option<Arc<ObserveRelation>>,
  observer: Option<Arc<dyn ExchangeObserver>>,
  completed: bool,
  request_acked: bool,
  response_acked: bool,
  timed_out: bool,
  rejected: bool,
  pub(crate) request_block_status: Option<BlockStatus>,
  pub(crate) response_block_status: Option<BlockStatus>,
  pub(crate) retransmission: Option<Retransmission>,
  pub(crate) notification_order: Option<NotificationOrder>,
}

impl Exchange {
  pub(crate) fn new(id: ExchangeId, origin: Origin, timestamp: Millis) -> Self {
    Self { id,
           origin,
           timestamp,
           local_addr: None,
           request: None,
           current_request: None,
           response: None,
           relation: None,
           observer: None,
           completed: false,
           request_acked: false,
           response_acked: false,
           timed_out: false,
           rejected: false,
           request_block_status: None,
           response_block_status: None,
           retransmission: None,
           notification_order: None }
  }

  /// See [`ExchangeId`]
  pub fn id(&self) -> ExchangeId {
    self.id
  }

  /// See [`Origin`]
  pub fn origin(&self) -> Origin {
    self.origin
  }

  /// When the exchange was created
  pub fn timestamp(&self) -> Millis {
    self.timestamp
  }

  /// Address of the endpoint this exchange belongs to
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.local_addr
  }

  /// The complete request.
  ///
  /// For blockwise transfers this is the whole body,
  /// not any single fragment.
  pub fn request(&self) -> Option<&Req> {
    self.request.as_ref()
  }

  /// The most recent request fragment sent or received
  pub fn current_request(&self) -> Option<&Req> {
    self.current_request.as_ref()
  }

  /// The most recent response (or response fragment) sent or received
  pub fn response(&self) -> Option<&Resp> {
    self.response.as_ref()
  }

  /// The observe relation established by this exchange, if any.
  ///
  /// Kept until the exchange is dropped, so that completing it can
  /// forget the relation's notifications even after the observe layer
  /// let go of it; check [`ObserveRelation::is_canceled`] for liveness.
  pub fn relation(&self) -> Option<Arc<ObserveRelation>> {
    self.relation.clone()
  }

  /// Has this exchange reached its terminal state?
  pub fn is_complete(&self) -> bool {
    self.completed
  }

  /// Did this exchange run out of retransmission attempts?
  pub fn is_timed_out(&self) -> bool {
    self.timed_out
  }

  /// Did the peer reject (RST) this exchange?
  pub fn is_rejected(&self) -> bool {
    self.rejected
  }

  /// Has the current request been acknowledged
  /// (by an empty ACK or a piggybacked response)?
  pub fn is_request_acknowledged(&self) -> bool {
    self.request_acked
  }

  /// Has the most recent CON response been acknowledged?
  pub fn is_response_acknowledged(&self) -> bool {
    self.response_acked
  }

  /// Is this a local exchange that registered interest in a resource?
  pub fn is_observing(&self) -> bool {
    self.origin == Origin::Local
    && self.request
           .as_ref()
           .map(Req::is_observe_register)
           .unwrap_or(false)
  }

  pub(crate) fn set_local_addr(&mut self, addr: SocketAddr) {
    self.local_addr = Some(addr);
  }

  pub(crate) fn set_request(&mut self, req: Req) {
    if self.completed {
      log::warn!("exchange {} is complete; not replacing its request", self.id);
    } else {
      self.request = Some(req);
    }
  }

  pub(crate) fn set_current_request(&mut self, req: Req) {
    if self.completed {
      log::warn!("exchange {} is complete; not replacing its current request",
                 self.id);
    } else {
      self.current_request = Some(req);
      self.request_acked = false;
    }
  }

  pub(crate) fn set_response(&mut self, resp: Resp) {
    self.response = Some(resp);
    self.response_acked = false;
  }

  pub(crate) fn set_relation(&mut self, relation: Arc<ObserveRelation>) {
    self.relation = Some(relation);
  }

  pub(crate) fn set_observer(&mut self, observer: Arc<dyn ExchangeObserver>) {
    if !self.completed {
      self.observer = Some(observer);
    }
  }

  pub(crate) fn set_request_acknowledged(&mut self) {
    self.request_acked = true;
  }

  pub(crate) fn set_response_acknowledged(&mut self) {
    self.response_acked = true;
  }

  pub(crate) fn set_timed_out(&mut self) {
    self.timed_out = true;
  }

  pub(crate) fn set_rejected(&mut self) {
    self.rejected = true;
  }

  /// Transition to the terminal state, notifying the completion
  /// observer. Returns `false` (and does nothing) if the exchange
  /// had already completed.
  pub(crate) fn set_complete(&mut self) -> bool {
    if self.completed {
      return false;
    }

    self.completed = true;
    self.retransmission = None;
    log::trace!("exchange {} complete", self.id);

    if let Some(observer) = self.observer.take() {
      observer.completed(self);
    }

    true
  }
}
