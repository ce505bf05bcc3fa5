use std::collections::VecDeque;
use std::fmt::Debug;

use crate::config::{CongestionControl, Config};
use crate::deliver::Deliverer;
use crate::exchange::{Exchange, ExchangeId};
use crate::msg::Message;
use crate::req::Req;
use crate::resp::Resp;
use crate::time::Millis;

/// Fragmenting & reassembling large bodies (RFC 7959)
pub mod blockwise;

/// Observe relations & notification ordering (RFC 7641)
pub mod observe;

/// Retransmission of confirmable messages & acknowledgement
pub mod reliability;

/// Token assignment
pub mod token;

/// A message moving through the stack
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
  /// A request
  Request(Req),
  /// A response
  Response(Resp),
  /// An empty message (ACK, RST, ping)
  Empty(Message),
}

/// Identifies a timer a layer asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
  /// Exchange the timer belongs to
  pub exchange: ExchangeId,
  /// Index of the layer that scheduled it
  pub layer: usize,
  /// Layer-defined discriminator
  pub tag: u8,
  /// When the timer should fire
  pub at: Millis,
}

/// Side-effects of a traversal that reach outside the exchange
/// being processed; carried out by the endpoint once the traversal ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
  /// Wake the layer up later
  Schedule(Timer),
  /// Complete some other exchange
  Complete(ExchangeId),
}

#[derive(Debug)]
enum Job {
  /// Send `msg`, starting at layer `from` and moving outward
  Down { from: usize, msg: Msg },
  /// Receive `msg`, handing it to the layers below index `below` and moving inward
  Up { below: usize, msg: Msg },
  TimedOut,
  Rejected,
}

/// Context handed to layers while a message moves through the stack
#[derive(Debug)]
pub struct Cx<'a> {
  now: Millis,
  config: &'a Config,
  exchange: ExchangeId,
  at: usize,
  jobs: VecDeque<Job>,
  effects: Vec<Effect>,
}

impl<'a> Cx<'a> {
  /// Create a context for one traversal concerning `exchange`
  pub fn new(now: Millis, config: &'a Config, exchange: ExchangeId) -> Self {
    Self { now,
           config,
           exchange,
           at: 0,
           jobs: Default::default(),
           effects: Default::default() }
  }

  /// Time the traversal started
  pub fn now(&self) -> Millis {
    self.now
  }

  /// Endpoint config
  pub fn config(&self) -> &Config {
    self.config
  }

  /// Send a request from the current layer toward the transport
  pub fn send_request(&mut self, req: Req) {
    self.down(Msg::Request(req));
  }

  /// Send a response from the current layer toward the transport
  pub fn send_response(&mut self, resp: Resp) {
    self.down(Msg::Response(resp));
  }

  /// Send an empty message from the current layer toward the transport
  pub fn send_empty(&mut self, msg: Message) {
    self.down(Msg::Empty(msg));
  }

  /// Hand a response from the current layer toward the application
  pub fn receive_response(&mut self, resp: Resp) {
    self.jobs.push_back(Job::Up { below: self.at,
                                  msg: Msg::Response(resp) });
  }

  /// Tell the application the exchange ran out of retransmissions
  pub fn deliver_timeout(&mut self) {
    self.jobs.push_back(Job::TimedOut);
  }

  /// Tell the application the peer rejected the exchange
  pub fn deliver_rejection(&mut self) {
    self.jobs.push_back(Job::Rejected);
  }

  /// Ask for the current layer's [`Layer::on_timer`] to be invoked at `at`
  pub fn schedule(&mut self, at: Millis, tag: u8) {
    self.effects.push(Effect::Schedule(Timer { exchange: self.exchange,
                                               layer: self.at,
                                               tag,
                                               at }));
  }

  /// Complete another exchange once this traversal ends
  pub fn complete_later(&mut self, exchange: ExchangeId) {
    self.effects.push(Effect::Complete(exchange));
  }

  /// Take the side-effects accumulated by the traversal
  pub fn into_effects(self) -> Vec<Effect> {
    self.effects
  }

  fn down(&mut self, msg: Msg) {
    self.jobs.push_back(Job::Down { from: self.at + 1,
                                    msg });
  }
}

/// One stage of the protocol pipeline.
///
/// Outbound messages visit layers top (application) to bottom (transport),
/// inbound messages bottom to top. Every hook gets the message by value and
/// returns `Some` to pass it on or `None` to stop it here; the defaults
/// pass everything through untouched.
///
/// Layers never call each other. To emit additional messages or
/// schedule work they use the [`Cx`].
pub trait Layer: Send + Debug {
  /// An outbound request
  fn send_request(&mut self, ex: &mut Exchange, req: Req, cx: &mut Cx<'_>) -> Option<Req> {
    let _ = (ex, cx);
    Some(req)
  }

  /// An outbound response
  fn send_response(&mut self, ex: &mut Exchange, resp: Resp, cx: &mut Cx<'_>) -> Option<Resp> {
    let _ = (ex, cx);
    Some(resp)
  }

  /// An outbound empty message
  fn send_empty(&mut self, ex: &mut Exchange, msg: Message, cx: &mut Cx<'_>) -> Option<Message> {
    let _ = (ex, cx);
    Some(msg)
  }

  /// An inbound request
  fn receive_request(&mut self, ex: &mut Exchange, req: Req, cx: &mut Cx<'_>) -> Option<Req> {
    let _ = (ex, cx);
    Some(req)
  }

  /// An inbound response
  fn receive_response(&mut self,
                      ex: &mut Exchange,
                      resp: Resp,
                      cx: &mut Cx<'_>)
                      -> Option<Resp> {
    let _ = (ex, cx);
    Some(resp)
  }

  /// An inbound empty message
  fn receive_empty(&mut self,
                   ex: &mut Exchange,
                   msg: Message,
                   cx: &mut Cx<'_>)
                   -> Option<Message> {
    let _ = (ex, cx);
    Some(msg)
  }

  /// A timer scheduled by this layer with [`Cx::schedule`] fired
  fn on_timer(&mut self, ex: &mut Exchange, timer: Timer, cx: &mut Cx<'_>) {
    let _ = (ex, timer, cx);
  }
}

/// Where messages leaving the bottom of the stack go
pub trait Outbox {
  /// Send a request
  fn send_request(&mut self, ex: &mut Exchange, req: Req);
  /// Send a response
  fn send_response(&mut self, ex: &mut Exchange, resp: Resp);
  /// Send an empty message
  fn send_empty(&mut self, ex: &mut Exchange, msg: Message);
}

/// An ordered pipeline of [`Layer`]s between the application
/// ([`Deliverer`]) and the transport ([`Outbox`]).
///
/// Index 0 is the layer closest to the application.
#[derive(Debug)]
pub struct Stack {
  layers: Vec<Box<dyn Layer>>,
  deliverer: Option<Box<dyn Deliverer>>,
}

impl Stack {
  /// The standard CoAP stack: observe, blockwise, token, reliability
  pub fn new(config: &Config) -> Self {
    let reliability: Box<dyn Layer> = match config.congestion_control {
      | CongestionControl::Fixed => Box::new(reliability::Reliability::new(reliability::Fixed)),
      | CongestionControl::BasicRto => {
        Box::new(reliability::Reliability::new(reliability::BasicRto::default()))
      },
      | CongestionControl::Cocoa => {
        Box::new(reliability::Reliability::new(reliability::Cocoa::default()))
      },
    };

    Self::from_layers(vec![Box::new(observe::Observe::default()),
                           Box::new(blockwise::Blockwise::default()),
                           Box::new(token::TokenLayer::new(config.msg.token_seed)),
                           reliability])
  }

  /// A stack of arbitrary layers, application side first
  pub fn from_layers(layers: Vec<Box<dyn Layer>>) -> Self {
    Self { layers,
           deliverer: None }
  }

  /// Number of layers
  pub fn len(&self) -> usize {
    self.layers.len()
  }

  /// Is the stack without layers?
  pub fn is_empty(&self) -> bool {
    self.layers.is_empty()
  }

  /// Set the recipient of inbound requests & responses
  pub fn set_deliverer(&mut self, deliverer: Box<dyn Deliverer>) {
    self.deliverer = Some(deliverer);
  }

  /// Has a deliverer been set?
  pub fn has_deliverer(&self) -> bool {
    self.deliverer.is_some()
  }

  /// Send a request the application created
  pub fn send_request(&mut self,
                      ex: &mut Exchange,
                      req: Req,
                      cx: &mut Cx<'_>,
                      outbox: &mut dyn Outbox) {
    ex.set_request(req.clone());
    self.run(ex, Job::Down { from: 0, msg: Msg::Request(req) }, cx, outbox);
  }

  /// Send a response the application created
  pub fn send_response(&mut self,
                       ex: &mut Exchange,
                       resp: Resp,
                       cx: &mut Cx<'_>,
                       outbox: &mut dyn Outbox) {
    ex.set_response(resp.clone());
    self.run(ex, Job::Down { from: 0, msg: Msg::Response(resp) }, cx, outbox);
  }

  /// Send an empty message the application created
  pub fn send_empty(&mut self,
                    ex: &mut Exchange,
                    msg: Message,
                    cx: &mut Cx<'_>,
                    outbox: &mut dyn Outbox) {
    self.run(ex, Job::Down { from: 0, msg: Msg::Empty(msg) }, cx, outbox);
  }

  /// Process a request that arrived from the transport
  pub fn receive_request(&mut self,
                         ex: &mut Exchange,
                         req: Req,
                         cx: &mut Cx<'_>,
                         outbox: &mut dyn Outbox) {
    let below = self.layers.len();
    self.run(ex, Job::Up { below, msg: Msg::Request(req) }, cx, outbox);
  }

  /// Process a response that arrived from the transport
  pub fn receive_response(&mut self,
                          ex: &mut Exchange,
                          resp: Resp,
                          cx: &mut Cx<'_>,
                          outbox: &mut dyn Outbox) {
    let below = self.layers.len();
    self.run(ex, Job::Up { below, msg: Msg::Response(resp) }, cx, outbox);
  }

  /// Process an empty message that arrived from the transport
  pub fn receive_empty(&mut self,
                       ex: &mut Exchange,
                       msg: Message,
                       cx: &mut Cx<'_>,
                       outbox: &mut dyn Outbox) {
    let below = self.layers.len();
    self.run(ex, Job::Up { below, msg: Msg::Empty(msg) }, cx, outbox);
  }

  /// Wake up the layer that scheduled `timer`
  pub fn on_timer(&mut self,
                  ex: &mut Exchange,
                  timer: Timer,
                  cx: &mut Cx<'_>,
                  outbox: &mut dyn Outbox) {
    match self.layers.get_mut(timer.layer) {
      | Some(layer) => {
        cx.at = timer.layer;
        layer.on_timer(ex, timer, cx);
      },
      | None => {
        log::warn!("timer {:?} names a layer that does not exist", timer);
        return;
      },
    }

    self.drain(ex, cx, outbox);
  }

  fn run(&mut self, ex: &mut Exchange, job: Job, cx: &mut Cx<'_>, outbox: &mut dyn Outbox) {
    cx.jobs.push_back(job);
    self.drain(ex, cx, outbox);
  }

  fn drain(&mut self, ex: &mut Exchange, cx: &mut Cx<'_>, outbox: &mut dyn Outbox) {
    while let Some(job) = cx.jobs.pop_front() {
      match job {
        | Job::Down { from, msg } => self.down(ex, from, msg, cx, outbox),
        | Job::Up { below, msg } => self.up(ex, below, msg, cx),
        | Job::TimedOut => match self.deliverer.as_mut() {
          | Some(d) => d.timed_out(ex),
          | None => log::error!("no deliverer to notify that exchange {} timed out", ex.id()),
        },
        | Job::Rejected => match self.deliverer.as_mut() {
          | Some(d) => d.rejected(ex),
          | None => log::error!("no deliverer to notify that exchange {} was rejected", ex.id()),
        },
      }
    }
  }

  fn down(&mut self,
          ex: &mut Exchange,
          from: usize,
          mut msg: Msg,
          cx: &mut Cx<'_>,
          outbox: &mut dyn Outbox) {
    for (ix, layer) in self.layers.iter_mut().enumerate().skip(from) {
      cx.at = ix;
      msg = match msg {
        | Msg::Request(req) => match layer.send_request(ex, req, cx) {
          | Some(req) => Msg::Request(req),
          | None => return,
        },
        | Msg::Response(resp) => match layer.send_response(ex, resp, cx) {
          | Some(resp) => Msg::Response(resp),
          | None => return,
        },
        | Msg::Empty(m) => match layer.send_empty(ex, m, cx) {
          | Some(m) => Msg::Empty(m),
          | None => return,
        },
      };
    }

    match msg {
      | Msg::Request(req) => outbox.send_request(ex, req),
      | Msg::Response(resp) => outbox.send_response(ex, resp),
      | Msg::Empty(m) => outbox.send_empty(ex, m),
    }
  }

  fn up(&mut self, ex: &mut Exchange, below: usize, mut msg: Msg, cx: &mut Cx<'_>) {
    for ix in (0..below.min(self.layers.len())).rev() {
      cx.at = ix;
      let layer = &mut self.layers[ix];
      msg = match msg {
        | Msg::Request(req) => match layer.receive_request(ex, req, cx) {
          | Some(req) => Msg::Request(req),
          | None => return,
        },
        | Msg::Response(resp) => match layer.receive_response(ex, resp, cx) {
          | Some(resp) => Msg::Response(resp),
          | None => return,
        },
        | Msg::Empty(m) => match layer.receive_empty(ex, m, cx) {
          | Some(m) => Msg::Empty(m),
          | None => return,
        },
      };
    }

    self.deliver(ex, msg);
  }

  fn deliver(&mut self, ex: &mut Exchange, msg: Msg) {
    let deliverer = match self.deliverer.as_mut() {
      | Some(d) => d,
      | None => {
        log::error!("no deliverer; dropping message for exchange {}", ex.id());
        return;
      },
    };

    match msg {
      | Msg::Request(req) => {
        ex.set_request(req);
        deliverer.deliver_request(ex);
      },
      | Msg::Response(resp) => {
        ex.set_response(resp.clone());
        if !resp.is_notification() {
          ex.set_complete();
        }
        deliverer.deliver_response(ex, &resp);
      },
      | Msg::Empty(m) => {
        log::trace!("{:?} on exchange {} reached the application; ignoring",
                    m.ty,
                    ex.id());
      },
    }
  }
}
