#![allow(dead_code)]

use ::std::io;
use ::std::net::{Ipv4Addr, SocketAddr};
use ::std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use ::std::sync::{mpsc, Arc, Mutex};
use ::std::time::Duration;

use embedded_time::rate::Fraction;
use embedded_time::Instant;
use toad_msg::Token;

use crate::codec::{Codec, MsgCodec, Parsed};
use crate::deliver::Deliverer;
use crate::exchange::{Exchange, ExchangeId};
use crate::executor::Executor;
use crate::msg::Message;
use crate::net::{Addrd, Connector, InboundChannel};
use crate::registry::{ConnectionState, ConnectionStateListener};
use crate::req::Req;
use crate::resp::Resp;
use crate::stack::{Msg, Outbox};

pub struct X3 {
  pub x: X2,
}

pub struct X2 {
  pub x: X1,
}

pub struct X1;

impl X1 {
  /// 1.1.1.1:port
  pub fn x(&self, port: u16) -> SocketAddr {
    SocketAddr::new(Ipv4Addr::new(1, 1, 1, 1).into(), port)
  }
}

/// `x.x.x.x(port)` is the address 1.1.1.1:port
#[allow(non_upper_case_globals)]
pub const x: X3 = X3 { x: X2 { x: X1 } };

pub fn token(bytes: &[u8]) -> Token {
  Token(bytes.iter().copied().collect())
}

/// Clock whose ticks are milliseconds and only move when told to
#[derive(Debug, Clone, Default)]
pub struct ClockMock(pub Arc<AtomicU64>);

impl ClockMock {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, ms: u64) {
    self.0.store(ms, Ordering::SeqCst);
  }

  pub fn advance(&self, ms: u64) {
    self.0.fetch_add(ms, Ordering::SeqCst);
  }
}

impl embedded_time::Clock for ClockMock {
  type T = u64;

  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.0.load(Ordering::SeqCst)))
  }
}

pub fn decode(data: &Addrd<Vec<u8>>) -> Message {
  match MsgCodec.parse(data.data(), data.addr()) {
    | Parsed::Request(m) | Parsed::Response(m) | Parsed::Empty(m) => m,
    | other => panic!("sent garbage: {:?}", other),
  }
}

pub fn encode(msg: &Message) -> Addrd<Vec<u8>> {
  Addrd(MsgCodec.serialize(msg).unwrap(), msg.peer)
}

/// Wait for every task submitted to `executor` so far to run
pub fn settle(executor: &Executor) {
  let (tx, rx) = mpsc::channel();
  executor.execute(move || {
            tx.send(()).ok();
          })
          .unwrap();
  rx.recv_timeout(Duration::from_secs(5))
    .expect("executor did not settle");
}

/// Connector that records what is sent and lets tests inject datagrams
#[derive(Debug, Default)]
pub struct ConnectorMock {
  pub tx: Mutex<Vec<Addrd<Vec<u8>>>>,
  pub channel: Mutex<Option<Arc<dyn InboundChannel>>>,
  pub listener: Mutex<Option<Arc<dyn ConnectionStateListener>>>,
  pub started: AtomicBool,
  pub stopped: AtomicBool,
  pub destroyed: AtomicBool,
  pub fail_start: AtomicBool,
}

impl ConnectorMock {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Decode everything sent so far
  pub fn sent(&self) -> Vec<Message> {
    self.tx.lock().unwrap().iter().map(decode).collect()
  }

  pub fn clear_sent(&self) {
    self.tx.lock().unwrap().clear();
  }

  /// Pretend a peer sent us this message
  pub fn inject(&self, msg: &Message) {
    self.inject_bytes(encode(msg));
  }

  pub fn inject_bytes(&self, data: Addrd<Vec<u8>>) {
    let channel = self.channel.lock().unwrap().clone();
    channel.expect("no inbound channel registered").receive(data);
  }

  /// Pretend a peer connected or disconnected
  pub fn connection(&self, peer: SocketAddr, state: ConnectionState) {
    if let Some(listener) = self.listener.lock().unwrap().clone() {
      listener.on_state_change(peer, state);
    }
  }
}

impl Connector for ConnectorMock {
  fn start(&self) -> io::Result<()> {
    if self.fail_start.load(Ordering::SeqCst) {
      Err(io::Error::new(io::ErrorKind::AddrInUse, "port taken"))
    } else {
      self.started.store(true, Ordering::SeqCst);
      Ok(())
    }
  }

  fn stop(&self) {
    self.stopped.store(true, Ordering::SeqCst);
  }

  fn destroy(&self) {
    self.destroyed.store(true, Ordering::SeqCst);
  }

  fn send(&self, data: Addrd<&[u8]>) -> nb::Result<(), io::Error> {
    self.tx
        .lock()
        .unwrap()
        .push(data.map(|bytes| bytes.to_vec()));
    Ok(())
  }

  fn set_inbound_channel(&self, channel: Arc<dyn InboundChannel>) {
    *self.channel.lock().unwrap() = Some(channel);
  }

  fn set_connection_state_listener(&self, listener: Arc<dyn ConnectionStateListener>) {
    *self.listener.lock().unwrap() = Some(listener);
  }

  fn local_addr(&self) -> SocketAddr {
    x.x.x.x(5683)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivered {
  Request(ExchangeId, Req),
  Response(ExchangeId, Resp),
  TimedOut(ExchangeId),
  Rejected(ExchangeId),
}

/// Deliverer that records what reached the application
#[derive(Debug, Clone, Default)]
pub struct DelivererMock(pub Arc<Mutex<Vec<Delivered>>>);

impl DelivererMock {
  pub fn delivered(&self) -> Vec<Delivered> {
    self.0.lock().unwrap().clone()
  }
}

impl Deliverer for DelivererMock {
  fn deliver_request(&mut self, exchange: &Exchange) {
    let req = exchange.request().cloned().expect("delivered without request");
    self.0.lock().unwrap().push(Delivered::Request(exchange.id(), req));
  }

  fn deliver_response(&mut self, exchange: &Exchange, response: &Resp) {
    self.0
        .lock()
        .unwrap()
        .push(Delivered::Response(exchange.id(), response.clone()));
  }

  fn timed_out(&mut self, exchange: &Exchange) {
    self.0.lock().unwrap().push(Delivered::TimedOut(exchange.id()));
  }

  fn rejected(&mut self, exchange: &Exchange) {
    self.0.lock().unwrap().push(Delivered::Rejected(exchange.id()));
  }
}

/// Outbox that records what left the bottom of the stack
#[derive(Debug, Default)]
pub struct OutboxMock {
  pub sent: Vec<Msg>,
}

impl OutboxMock {
  pub fn requests(&self) -> Vec<&Req> {
    self.sent
        .iter()
        .filter_map(|m| match m {
          | Msg::Request(r) => Some(r),
          | _ => None,
        })
        .collect()
  }

  pub fn responses(&self) -> Vec<&Resp> {
    self.sent
        .iter()
        .filter_map(|m| match m {
          | Msg::Response(r) => Some(r),
          | _ => None,
        })
        .collect()
  }

  pub fn empties(&self) -> Vec<&Message> {
    self.sent
        .iter()
        .filter_map(|m| match m {
          | Msg::Empty(m) => Some(m),
          | _ => None,
        })
        .collect()
  }
}

impl Outbox for OutboxMock {
  fn send_request(&mut self, exchange: &mut Exchange, req: Req) {
    exchange.set_current_request(req.clone());
    self.sent.push(Msg::Request(req));
  }

  fn send_response(&mut self, exchange: &mut Exchange, resp: Resp) {
    exchange.set_response(resp.clone());
    self.sent.push(Msg::Response(resp));
  }

  fn send_empty(&mut self, _: &mut Exchange, msg: Message) {
    self.sent.push(Msg::Empty(msg));
  }
}
