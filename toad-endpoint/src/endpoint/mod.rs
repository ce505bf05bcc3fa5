use std::fmt::{self, Debug};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::codec::{Codec, MsgCodec};
use crate::config::Config;
use crate::deliver::Deliverer;
use crate::error::{Error, When};
use crate::exchange::{Exchange, ExchangeId, Origin};
use crate::executor::{Executor, Scheduled};
use crate::interceptor::{Interceptor, InterceptorId, Interceptors};
use crate::matcher::{Health, Matcher, Monitor};
use crate::msg::Message;
use crate::net::Connector;
use crate::req::Req;
use crate::resp::Resp;
use crate::stack::{Cx, Effect, Stack, Timer};
use crate::time::{self, elapsed, Clock, Millis};

mod dedup;
mod inbox;
mod outbox;

use dedup::Deduplicator;
use inbox::Inbox;
use outbox::{MessageIds, Transport};

/// How often exchanges & remembered message ids that outlived
/// the exchange lifetime are swept away
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
  m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Notified when an [`Endpoint`] changes lifecycle state
pub trait EndpointObserver: Send + Debug {
  /// The endpoint started listening on `addr`
  fn started(&mut self, addr: SocketAddr) {
    let _ = addr;
  }

  /// The endpoint stopped listening on `addr`
  fn stopped(&mut self, addr: SocketAddr) {
    let _ = addr;
  }

  /// The endpoint was destroyed
  fn destroyed(&mut self, addr: SocketAddr) {
    let _ = addr;
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Stopped,
  Started,
  Destroyed,
}

#[derive(Debug)]
struct Lifecycle {
  state: State,
  tasks: Vec<Scheduled>,
  observers: Vec<Box<dyn EndpointObserver>>,
}

/// Protocol state; only touched from the executor
/// (and by lifecycle calls that clear it)
#[derive(Debug)]
struct Core {
  matcher: Matcher,
  stack: Stack,
  interceptors: Interceptors,
  dedup: Deduplicator,
  ids: MessageIds,
  codec: Box<dyn Codec>,
}

struct Shared<Clk> {
  me: Weak<Shared<Clk>>,
  config: Config,
  clock: Clk,
  connector: Arc<dyn Connector>,
  monitor: Monitor,
  exchange_ids: Arc<AtomicU64>,
  destroyed: AtomicBool,
  executor: Mutex<Option<Executor>>,
  core: Mutex<Core>,
  lifecycle: Mutex<Lifecycle>,
}

impl<Clk> Shared<Clk> where Clk: Clock + Send + Sync + 'static
{
  fn core(&self) -> MutexGuard<'_, Core> {
    lock(&self.core)
  }

  fn executor(&self) -> Option<Executor> {
    lock(&self.executor).clone()
  }

  fn now(&self) -> Option<Millis> {
    match time::now(&self.clock) {
      | Ok(now) => Some(now),
      | Err(e) => {
        log::error!("clock failed: {:?}", e);
        None
      },
    }
  }

  /// Run `task` on the executor, if the endpoint is still around by then
  fn submit(&self, task: impl FnOnce(&Shared<Clk>) + Send + 'static) -> Result<(), Error> {
    if self.destroyed.load(Ordering::Acquire) {
      return Err(Error::Destroyed);
    }

    let executor = self.executor().ok_or(Error::NoExecutor)?;
    let me = self.me.clone();
    executor.execute(move || {
              if let Some(shared) = me.upgrade() {
                task(&shared)
              }
            })
  }

  /// Check exchange `id` out of the matcher, run one traversal over it
  /// and check it back in, then carry out the traversal's effects.
  ///
  /// `false` when the exchange does not exist (anymore).
  fn traverse(&self,
              core: &mut Core,
              id: ExchangeId,
              now: Millis,
              f: impl FnOnce(&mut Stack, &mut Exchange, &mut Cx<'_>, &mut Transport<'_>))
              -> bool {
    let Core { matcher,
               stack,
               interceptors,
               dedup,
               ids,
               codec, } = core;

    let mut ex = match matcher.check_out(id) {
      | Some(ex) => ex,
      | None => return false,
    };

    let mut cx = Cx::new(now, &self.config, id);
    let mut transport = Transport { matcher: &*matcher,
                                    interceptors,
                                    dedup,
                                    ids,
                                    codec: codec.as_ref(),
                                    connector: self.connector.as_ref() };
    f(stack, &mut ex, &mut cx, &mut transport);
    matcher.check_in(ex);

    let effects = cx.into_effects();
    self.apply(core, now, effects);
    true
  }

  fn apply(&self, core: &mut Core, now: Millis, effects: Vec<Effect>) {
    for effect in effects {
      match effect {
        | Effect::Schedule(timer) => self.schedule(timer, now),
        | Effect::Complete(id) => {
          if let Some(mut ex) = core.matcher.check_out(id) {
            ex.set_complete();
            core.matcher.check_in(ex);
          }
        },
      }
    }
  }

  fn schedule(&self, timer: Timer, now: Millis) {
    let delay = Duration::from_millis(elapsed(now, timer.at).0);
    let me = self.me.clone();
    let scheduled = self.executor().map(|executor| {
                                     executor.schedule(delay, move || {
                                               if let Some(shared) = me.upgrade() {
                                                 shared.on_timer(timer)
                                               }
                                             })
                                   });

    match scheduled {
      | Some(Ok(_)) => (),
      | Some(Err(e)) => log::warn!("could not schedule {:?}: {}", timer, e),
      | None => log::warn!("no executor to schedule {:?} on", timer),
    }
  }

  fn on_timer(&self, timer: Timer) {
    let now = match self.now() {
      | Some(now) => now,
      | None => return,
    };

    let mut core = self.core();
    let fired = self.traverse(&mut core, timer.exchange, now, |stack, ex, cx, out| {
                      stack.on_timer(ex, timer, cx, out)
                    });
    if !fired {
      log::trace!("exchange {} finished before its timer", timer.exchange);
    }
  }

  fn send_request(&self, id: ExchangeId, req: Req) {
    let now = match self.now() {
      | Some(now) => now,
      | None => return,
    };

    let mut core = self.core();
    let mut ex = Exchange::new(id, Origin::Local, now);
    ex.set_local_addr(self.connector.local_addr());
    core.matcher.observe(&mut ex);
    core.matcher.check_in(ex);

    self.traverse(&mut core, id, now, |stack, ex, cx, out| {
          stack.send_request(ex, req, cx, out)
        });
  }

  fn send_response(&self, id: ExchangeId, resp: Resp) {
    let now = match self.now() {
      | Some(now) => now,
      | None => return,
    };

    let mut core = self.core();
    let sent = self.traverse(&mut core, id, now, |stack, ex, cx, out| {
                     stack.send_response(ex, resp, cx, out)
                   });
    if !sent {
      log::warn!("exchange {} is gone; dropping response", id);
    }
  }

  fn send_empty(&self, id: ExchangeId, msg: Message) {
    let now = match self.now() {
      | Some(now) => now,
      | None => return,
    };

    let mut core = self.core();
    let sent = self.traverse(&mut core, id, now, |stack, ex, cx, out| {
                     stack.send_empty(ex, msg, cx, out)
                   });
    if !sent {
      log::warn!("exchange {} is gone; dropping empty message", id);
    }
  }

  fn sweep(&self) {
    let now = match self.now() {
      | Some(now) => now,
      | None => return,
    };

    let lifetime = self.config.exchange_lifetime();
    let mut core = self.core();
    let exchanges = core.matcher.sweep(now, lifetime);
    let ids = core.dedup.purge(now, lifetime);
    if exchanges + ids > 0 {
      log::debug!("swept {} exchanges & {} message ids that outlived their lifetime",
                  exchanges,
                  ids);
    }
  }

  fn clear(&self) {
    let mut core = self.core();
    core.matcher.clear();
    core.dedup.clear();
  }

  fn periodic_tasks(&self, executor: &Executor) -> Result<Vec<Scheduled>, Error> {
    let mut tasks = vec![];

    let level = self.config.health.level;
    let every = Duration::from_secs(self.config.health.interval_secs);
    if !every.is_zero() {
      let monitor = self.monitor.clone();
      tasks.push(executor.schedule_at_fixed_rate(every, every, move || {
                           log::log!(level, "{}", monitor.health())
                         })?);
    }

    let me = self.me.clone();
    let sweep = executor.schedule_at_fixed_rate(SWEEP_INTERVAL, SWEEP_INTERVAL, move || {
                          if let Some(shared) = me.upgrade() {
                            shared.sweep()
                          }
                        });
    match sweep {
      | Ok(task) => {
        tasks.push(task);
        Ok(tasks)
      },
      | Err(e) => {
        tasks.iter().for_each(Scheduled::cancel);
        Err(e)
      },
    }
  }
}

/// A CoAP endpoint: binds a [`Connector`] to the matcher and
/// the protocol [`Stack`], and runs them on an [`Executor`].
///
/// ```no_run
/// use std::sync::Arc;
///
/// use toad_endpoint::config::Config;
/// use toad_endpoint::endpoint::Endpoint;
/// use toad_endpoint::executor::Executor;
/// use toad_endpoint::std::UdpConnector;
///
/// let connector = Arc::new(UdpConnector::bind("0.0.0.0:5683").unwrap());
/// let endpoint = Endpoint::new(connector, Config::default());
/// endpoint.set_executor(Executor::new("coap").unwrap());
/// endpoint.start().unwrap();
/// ```
pub struct Endpoint<Clk = crate::std::Clock>
  where Clk: Clock + Send + Sync + 'static
{
  shared: Arc<Shared<Clk>>,
}

impl<Clk> Debug for Endpoint<Clk> where Clk: Clock + Send + Sync + 'static
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Endpoint")
     .field("local_addr", &self.local_addr())
     .field("started", &self.is_started())
     .field("config", &self.shared.config)
     .finish()
  }
}

impl Endpoint<crate::std::Clock> {
  /// Create an endpoint on top of `connector`
  pub fn new(connector: Arc<dyn Connector>, config: Config) -> Self {
    Self::with_clock(connector, config, crate::std::Clock::new())
  }
}

impl<Clk> Endpoint<Clk> where Clk: Clock + Send + Sync + 'static
{
  /// Create an endpoint that reads time from `clock`
  pub fn with_clock(connector: Arc<dyn Connector>, config: Config, clock: Clk) -> Self {
    let matcher = Matcher::new();
    let started_at = time::now(&clock).map(|now| now.0).unwrap_or_default();
    let seed = ((config.msg.token_seed as u64) << 48) ^ started_at;

    let shared = Arc::new_cyclic(|me| Shared { me: me.clone(),
                                               monitor: matcher.monitor(),
                                               exchange_ids: matcher.ids(),
                                               core: Mutex::new(Core { stack: Stack::new(&config),
                                                                       matcher,
                                                                       interceptors:
                                                                         Default::default(),
                                                                       dedup: Default::default(),
                                                                       ids: MessageIds::new(seed),
                                                                       codec: Box::new(MsgCodec) }),
                                               config,
                                               clock,
                                               connector,
                                               destroyed: AtomicBool::new(false),
                                               executor: Mutex::new(None),
                                               lifecycle: Mutex::new(Lifecycle { state:
                                                                                   State::Stopped,
                                                                                 tasks: vec![],
                                                                                 observers:
                                                                                   vec![] }) });

    Self { shared }
  }

  /// Attach the executor all protocol work runs on.
  ///
  /// Must happen before [`Endpoint::start`].
  pub fn set_executor(&self, executor: Executor) {
    *lock(&self.shared.executor) = Some(executor);
  }

  /// Set the recipient of inbound requests & responses
  pub fn set_deliverer(&self, deliverer: impl Deliverer + 'static) {
    self.shared.core().stack.set_deliverer(Box::new(deliverer));
  }

  /// Replace the default [`MsgCodec`]
  pub fn set_codec(&self, codec: impl Codec + 'static) {
    self.shared.core().codec = Box::new(codec);
  }

  /// Add an interceptor, run after those added before it
  pub fn add_interceptor(&self, interceptor: impl Interceptor + 'static) -> InterceptorId {
    self.shared.core().interceptors.add(Box::new(interceptor))
  }

  /// Remove an interceptor, `false` if there was no such interceptor
  pub fn remove_interceptor(&self, id: InterceptorId) -> bool {
    self.shared.core().interceptors.remove(id)
  }

  /// Number of interceptors
  pub fn interceptor_count(&self) -> usize {
    self.shared.core().interceptors.len()
  }

  /// Get notified of lifecycle changes
  pub fn add_observer(&self, observer: impl EndpointObserver + 'static) {
    lock(&self.shared.lifecycle).observers.push(Box::new(observer));
  }

  /// Start the connector & the periodic tasks.
  ///
  /// Starting a started endpoint does nothing. Fails without an executor,
  /// and when the connector fails to start; either way nothing is left running.
  pub fn start(&self) -> Result<(), Error> {
    let shared = &self.shared;
    let mut life = lock(&shared.lifecycle);
    match life.state {
      | State::Destroyed => return Err(Error::Destroyed),
      | State::Started => return Ok(()),
      | State::Stopped => (),
    }

    let executor = shared.executor().ok_or(Error::NoExecutor)?;
    let addr = shared.connector.local_addr();
    if !shared.core().stack.has_deliverer() {
      log::error!("endpoint on {} has no deliverer; inbound requests & responses will be dropped",
                  addr);
    }

    shared.connector
          .set_inbound_channel(Arc::new(Inbox(shared.me.clone())));
    shared.connector
          .start()
          .map_err(|e| Error::Connector(When::Starting, e))?;

    match shared.periodic_tasks(&executor) {
      | Ok(tasks) => life.tasks = tasks,
      | Err(e) => {
        shared.connector.stop();
        return Err(e);
      },
    }

    life.state = State::Started;
    life.observers.iter_mut().for_each(|o| o.started(addr));
    log::info!("endpoint started on {}", addr);
    Ok(())
  }

  /// Stop the connector & periodic tasks and forget all exchanges.
  ///
  /// Stopping a stopped endpoint does nothing. Must not be invoked
  /// from a [`Deliverer`].
  pub fn stop(&self) {
    let shared = &self.shared;
    let mut life = lock(&shared.lifecycle);
    if life.state != State::Started {
      return;
    }

    life.tasks.drain(..).for_each(|t| t.cancel());
    shared.connector.stop();
    shared.clear();
    life.state = State::Stopped;

    let addr = shared.connector.local_addr();
    life.observers.iter_mut().for_each(|o| o.stopped(addr));
    log::info!("endpoint on {} stopped", addr);
  }

  /// Stop the endpoint and release the connector for good
  pub fn destroy(&self) {
    self.stop();

    let shared = &self.shared;
    let mut life = lock(&shared.lifecycle);
    if life.state == State::Destroyed {
      return;
    }

    shared.connector.destroy();
    shared.destroyed.store(true, Ordering::Release);
    life.state = State::Destroyed;

    let addr = shared.connector.local_addr();
    life.observers.iter_mut().for_each(|o| o.destroyed(addr));
    log::info!("endpoint on {} destroyed", addr);
  }

  /// Forget all exchanges without touching the connector
  pub fn clear(&self) {
    self.shared.clear();
  }

  /// Has the endpoint been started (and not stopped since)?
  pub fn is_started(&self) -> bool {
    lock(&self.shared.lifecycle).state == State::Started
  }

  /// Address the connector is bound to
  pub fn local_addr(&self) -> SocketAddr {
    self.shared.connector.local_addr()
  }

  /// The configuration the endpoint was created with
  pub fn config(&self) -> &Config {
    &self.shared.config
  }

  /// Sizes of the matcher's correlation tables
  pub fn health(&self) -> Health {
    self.shared.monitor.health()
  }

  /// See [`Monitor`]
  pub fn monitor(&self) -> Monitor {
    self.shared.monitor.clone()
  }

  /// A handle the application sends messages through
  pub fn handle(&self) -> EndpointHandle<Clk> {
    EndpointHandle(Arc::downgrade(&self.shared))
  }

  /// See [`EndpointHandle::send_request`]
  pub fn send_request(&self, req: Req) -> Result<ExchangeId, Error> {
    self.handle().send_request(req)
  }

  /// See [`EndpointHandle::send_response`]
  pub fn send_response(&self, exchange: ExchangeId, resp: Resp) -> Result<(), Error> {
    self.handle().send_response(exchange, resp)
  }
}

impl<Clk> Drop for Endpoint<Clk> where Clk: Clock + Send + Sync + 'static
{
  fn drop(&mut self) {
    self.stop();
  }
}

/// The application's way of sending messages through an [`Endpoint`].
///
/// Cheap to clone and safe to use from any thread (including from a
/// [`Deliverer`]). Sending is asynchronous: messages are queued on the
/// endpoint's executor and outcomes arrive through the deliverer.
pub struct EndpointHandle<Clk = crate::std::Clock>(Weak<Shared<Clk>>)
  where Clk: Clock + Send + Sync + 'static;

impl<Clk> Clone for EndpointHandle<Clk> where Clk: Clock + Send + Sync + 'static
{
  fn clone(&self) -> Self {
    Self(self.0.clone())
  }
}

impl<Clk> Debug for EndpointHandle<Clk> where Clk: Clock + Send + Sync + 'static
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("EndpointHandle")
     .field(&self.0.upgrade().map(|s| s.connector.local_addr()))
     .finish()
  }
}

impl<Clk> EndpointHandle<Clk> where Clk: Clock + Send + Sync + 'static
{
  fn shared(&self) -> Result<Arc<Shared<Clk>>, Error> {
    self.0.upgrade().ok_or(Error::Destroyed)
  }

  /// Send a request, yielding the id of the exchange its
  /// response(s) will be delivered on
  pub fn send_request(&self, req: Req) -> Result<ExchangeId, Error> {
    let shared = self.shared()?;
    let id = Matcher::next_id(&shared.exchange_ids);
    shared.submit(move |s| s.send_request(id, req))?;
    Ok(id)
  }

  /// Answer the request delivered on `exchange`
  pub fn send_response(&self, exchange: ExchangeId, resp: Resp) -> Result<(), Error> {
    self.shared()?
        .submit(move |s| s.send_response(exchange, resp))
  }

  /// Send an empty message (e.g. an ACK ahead of a separate response) on `exchange`
  pub fn send_empty(&self, exchange: ExchangeId, msg: Message) -> Result<(), Error> {
    self.shared()?.submit(move |s| s.send_empty(exchange, msg))
  }

  /// Address of the endpoint's connector
  pub fn local_addr(&self) -> Result<SocketAddr, Error> {
    self.shared().map(|s| s.connector.local_addr())
  }
}

#[cfg(test)]
mod test {
  use std::sync::atomic::AtomicUsize;
  use std::thread;

  use embedded_time::duration::Milliseconds;
  use toad_msg::{Id, Type};

  use super::*;
  use crate::net::Addrd;
  use crate::resp::code;
  use crate::retry::{Attempts, Strategy};
  use crate::test::{self, settle, ClockMock, ConnectorMock, Delivered, DelivererMock};

  struct Harness {
    ep: Endpoint<ClockMock>,
    conn: Arc<ConnectorMock>,
    deliverer: DelivererMock,
    executor: Executor,
    clock: ClockMock,
  }

  impl Harness {
    fn settle(&self) {
      settle(&self.executor);
    }
  }

  fn config() -> Config {
    let mut config = Config::default();
    config.msg.con.ack_timeout = Strategy::Exponential { init_min: Milliseconds(10),
                                                         init_max: Milliseconds(10) };
    config.msg.con.max_attempts = Attempts(3);
    config
  }

  fn harness() -> Harness {
    let conn = ConnectorMock::new();
    let clock = ClockMock::new();
    let ep = Endpoint::with_clock(conn.clone(), config(), clock.clone());
    let deliverer = DelivererMock::default();
    ep.set_deliverer(deliverer.clone());
    let executor = Executor::new("test").unwrap();
    ep.set_executor(executor.clone());
    ep.start().unwrap();

    Harness { ep,
              conn,
              deliverer,
              executor,
              clock }
  }

  fn get(id: u16, token: u8) -> Req {
    let mut req = Req::get(test::x.x.x.x(1), "hello");
    req.msg_mut().id = Some(Id(id));
    req.msg_mut().token = test::token(&[token]);
    req
  }

  #[derive(Debug, Default, Clone)]
  struct Transitions(Arc<Mutex<Vec<&'static str>>>);

  impl EndpointObserver for Transitions {
    fn started(&mut self, _: SocketAddr) {
      self.0.lock().unwrap().push("started");
    }

    fn stopped(&mut self, _: SocketAddr) {
      self.0.lock().unwrap().push("stopped");
    }

    fn destroyed(&mut self, _: SocketAddr) {
      self.0.lock().unwrap().push("destroyed");
    }
  }

  #[test]
  fn start_requires_executor() {
    let conn = ConnectorMock::new();
    let ep = Endpoint::with_clock(conn.clone(), config(), ClockMock::new());
    assert!(matches!(ep.start(), Err(Error::NoExecutor)));
    assert!(!ep.is_started());
    assert!(!conn.started.load(Ordering::SeqCst));
  }

  #[test]
  fn failed_start_leaves_nothing_running() {
    let conn = ConnectorMock::new();
    conn.fail_start.store(true, Ordering::SeqCst);
    let ep = Endpoint::with_clock(conn.clone(), config(), ClockMock::new());
    ep.set_executor(Executor::new("test").unwrap());

    assert!(matches!(ep.start(), Err(Error::Connector(When::Starting, _))));
    assert!(!ep.is_started());
    assert!(lock(&ep.shared.lifecycle).tasks.is_empty());
  }

  #[test]
  fn lifecycle() {
    let h = harness();
    let transitions = Transitions::default();
    h.ep.add_observer(transitions.clone());

    h.ep.start().unwrap();
    h.ep.stop();
    h.ep.stop();
    assert!(!h.ep.is_started());
    assert!(h.conn.stopped.load(Ordering::SeqCst));

    h.ep.start().unwrap();
    h.ep.destroy();
    assert!(h.conn.destroyed.load(Ordering::SeqCst));
    assert!(matches!(h.ep.start(), Err(Error::Destroyed)));
    assert!(matches!(h.ep.send_request(get(1, 1)), Err(Error::Destroyed)));

    assert_eq!(*transitions.0.lock().unwrap(),
               vec!["stopped", "started", "stopped", "destroyed"]);
  }

  #[test]
  fn request_response() {
    let h = harness();
    h.conn.inject(get(1, 1).msg());
    h.settle();

    let (id, req) = match h.deliverer.delivered().as_slice() {
      | [Delivered::Request(id, req)] => (*id, req.clone()),
      | other => panic!("{:?}", other),
    };
    assert_eq!(req.msg().path(), "hello");

    let mut resp = Resp::for_request(&req);
    resp.msg_mut().set_payload("hi".bytes());
    h.ep.send_response(id, resp).unwrap();
    h.settle();

    let sent = h.conn.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ty, Type::Ack);
    assert_eq!(sent[0].id, Some(Id(1)));
    assert_eq!(sent[0].token, test::token(&[1]));
    assert_eq!(sent[0].payload, b"hi".to_vec());
    assert!(h.ep.health().is_empty());
  }

  #[test]
  fn duplicate_requests_are_answered_again() {
    let h = harness();
    h.conn.inject(get(1, 1).msg());
    h.settle();
    h.conn.inject(get(1, 1).msg());
    h.settle();
    assert_eq!(h.deliverer.delivered().len(), 1);
    assert!(h.conn.sent().is_empty());

    let id = match h.deliverer.delivered().as_slice() {
      | [Delivered::Request(id, _)] => *id,
      | other => panic!("{:?}", other),
    };
    h.ep.send_response(id, Resp::for_request(&get(1, 1))).unwrap();
    h.settle();
    h.conn.inject(get(1, 1).msg());
    h.settle();

    let sent = h.conn.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
    assert_eq!(h.deliverer.delivered().len(), 1);
  }

  #[test]
  fn malformed_request_is_reset() {
    let h = harness();
    // CON GET claiming an 8 byte token it does not carry
    h.conn.inject_bytes(Addrd(vec![0x48, 0x01, 0x12, 0x34], test::x.x.x.x(1)));
    h.settle();

    let sent = h.conn.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ty, Type::Reset);
    assert_eq!(sent[0].id, Some(Id(0x1234)));
    assert!(h.deliverer.delivered().is_empty());
    assert!(h.ep.shared.core().matcher.is_empty());
  }

  #[test]
  fn garbage_is_ignored() {
    let h = harness();
    h.conn.inject_bytes(Addrd(vec![0xff, 0x01], test::x.x.x.x(1)));
    h.settle();
    assert!(h.conn.sent().is_empty());
  }

  #[test]
  fn ping_is_reset() {
    let h = harness();
    let mut ping = Message::ping(test::x.x.x.x(1));
    ping.id = Some(Id(9));
    h.conn.inject(&ping);
    h.settle();

    let sent = h.conn.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ty, Type::Reset);
    assert_eq!(sent[0].id, Some(Id(9)));
  }

  fn sent_request(h: &Harness) -> (ExchangeId, Message) {
    let id = h.ep.send_request(Req::get(test::x.x.x.x(1), "a")).unwrap();
    h.settle();
    let sent = h.conn.sent();
    assert_eq!(sent.len(), 1);
    (id, sent[0].clone())
  }

  #[test]
  fn client_request_is_answered() {
    let h = harness();
    let (id, req) = sent_request(&h);
    assert_eq!(req.ty, Type::Con);
    assert_eq!(req.token_bytes().len(), 8);
    assert!(req.id.is_some());

    let mut ack = Message::new(Type::Ack, code::CONTENT, req.peer);
    ack.id = req.id;
    ack.token = req.token;
    h.conn.inject(&ack);
    h.settle();

    match h.deliverer.delivered().as_slice() {
      | [Delivered::Response(ex, resp)] => {
        assert_eq!(*ex, id);
        assert_eq!(resp.code(), code::CONTENT);
      },
      | other => panic!("{:?}", other),
    }
    assert!(h.ep.health().is_empty());
  }

  #[test]
  fn stale_ack_is_dropped() {
    let h = harness();
    let (_, req) = sent_request(&h);

    let mut ack = Message::new(Type::Ack, code::CONTENT, req.peer);
    ack.id = req.id.map(|Id(n)| Id(n.wrapping_add(100)));
    ack.token = req.token;
    h.conn.inject(&ack);
    h.settle();

    assert!(h.deliverer.delivered().is_empty());
    assert_eq!(h.conn.sent().len(), 1);
  }

  #[test]
  fn unmatched_response_is_reset() {
    let h = harness();
    let mut resp = Message::new(Type::Con, code::CONTENT, test::x.x.x.x(1));
    resp.id = Some(Id(77));
    resp.token = test::token(&[9, 9]);
    h.conn.inject(&resp);
    h.settle();

    let sent = h.conn.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ty, Type::Reset);
    assert_eq!(sent[0].id, Some(Id(77)));
  }

  #[test]
  fn retransmits_then_times_out() {
    let h = harness();
    let (id, req) = sent_request(&h);

    h.clock.set(10);
    thread::sleep(Duration::from_millis(100));
    h.settle();
    let sent = h.conn.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].id, req.id);

    h.clock.set(1_000);
    thread::sleep(Duration::from_millis(100));
    h.settle();
    assert_eq!(h.deliverer.delivered(), vec![Delivered::TimedOut(id)]);
    assert!(h.ep.health().is_empty());
  }

  #[derive(Debug)]
  struct DropRequests;

  impl Interceptor for DropRequests {
    fn receive_request(&mut self, req: &mut Req) {
      req.msg_mut().cancel();
    }
  }

  #[test]
  fn interceptors_can_cancel() {
    let h = harness();
    let id = h.ep.add_interceptor(DropRequests);
    assert_eq!(h.ep.interceptor_count(), 1);

    h.conn.inject(get(1, 1).msg());
    h.settle();
    assert!(h.deliverer.delivered().is_empty());

    assert!(h.ep.remove_interceptor(id));
    h.conn.inject(get(2, 2).msg());
    h.settle();
    assert_eq!(h.deliverer.delivered().len(), 1);
  }

  #[derive(Debug)]
  struct DropReplies;

  impl Interceptor for DropReplies {
    fn send_response(&mut self, resp: &mut Resp) {
      resp.msg_mut().cancel();
    }
  }

  #[test]
  fn canceled_reply_is_not_sent_to_duplicates() {
    let h = harness();
    h.ep.add_interceptor(DropReplies);
    h.conn.inject(get(1, 1).msg());
    h.settle();

    let id = match h.deliverer.delivered().as_slice() {
      | [Delivered::Request(id, _)] => *id,
      | other => panic!("{:?}", other),
    };
    h.ep.send_response(id, Resp::for_request(&get(1, 1))).unwrap();
    h.settle();
    h.conn.inject(get(1, 1).msg());
    h.settle();

    assert!(h.conn.sent().is_empty());
    assert_eq!(h.deliverer.delivered().len(), 1);
  }

  #[derive(Debug, Clone, Default)]
  struct Tally(Arc<AtomicUsize>);

  impl Interceptor for Tally {
    fn send_response(&mut self, _: &mut Resp) {
      self.0.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[test]
  fn interceptors_see_repeated_replies() {
    let h = harness();
    let tally = Tally::default();
    h.ep.add_interceptor(tally.clone());
    h.conn.inject(get(1, 1).msg());
    h.settle();

    let id = match h.deliverer.delivered().as_slice() {
      | [Delivered::Request(id, _)] => *id,
      | other => panic!("{:?}", other),
    };
    h.ep.send_response(id, Resp::for_request(&get(1, 1))).unwrap();
    h.settle();
    h.conn.inject(get(1, 1).msg());
    h.settle();

    assert_eq!(h.conn.sent().len(), 2);
    assert_eq!(tally.0.load(Ordering::SeqCst), 2);
  }

  fn observe_request(id: u16, seq: u32) -> Req {
    let mut req = get(id, 1);
    req.msg_mut().set_observe(seq);
    req
  }

  /// Establish an observe relation and send 3 NON notifications on it
  fn observed(h: &Harness) -> (ExchangeId, Req) {
    h.conn.inject(observe_request(1, 0).msg());
    h.settle();

    let (id, req) = match h.deliverer.delivered().as_slice() {
      | [Delivered::Request(id, req)] => (*id, req.clone()),
      | other => panic!("{:?}", other),
    };

    h.ep.send_response(id, Resp::for_request(&req)).unwrap();
    for _ in 0..3 {
      h.ep.send_response(id, Resp::non(&req)).unwrap();
    }
    h.settle();

    assert_eq!(h.conn.sent().len(), 4);
    assert_eq!(h.ep.health().by_mid, 3);
    (id, req)
  }

  #[test]
  fn deregistration_forgets_notifications() {
    let h = harness();
    observed(&h);

    h.conn.inject(observe_request(2, 1).msg());
    h.settle();

    assert_eq!(h.deliverer.delivered().len(), 2);
    assert!(h.ep.health().is_empty());
  }

  #[test]
  fn reregistration_forgets_notifications() {
    let h = harness();
    let (first, _) = observed(&h);

    h.conn.inject(observe_request(2, 0).msg());
    h.settle();

    assert!(h.ep.health().is_empty());
    assert!(!h.ep.shared.core().matcher.contains(first));
  }

  #[test]
  fn error_response_forgets_notifications() {
    let h = harness();
    let (id, req) = observed(&h);

    let mut gone = Resp::non(&req);
    gone.set_code(code::NOT_FOUND);
    h.ep.send_response(id, gone).unwrap();
    h.settle();

    let sent = h.conn.sent();
    assert_eq!(sent.len(), 5);
    assert_eq!(sent[4].observe(), None);
    assert!(h.ep.health().is_empty());
    assert!(!h.ep.shared.core().matcher.contains(id));
  }

  #[test]
  fn reset_notification_forgets_notifications() {
    let h = harness();
    let (id, _) = observed(&h);

    let last = h.conn.sent()[3].clone();
    h.conn.inject(&last.reset());
    h.settle();

    assert!(h.ep.health().is_empty());
    assert!(!h.ep.shared.core().matcher.contains(id));
  }

  #[test]
  fn unacknowledged_notification_forgets_notifications() {
    let h = harness();
    let (id, req) = observed(&h);

    h.ep.send_response(id, Resp::con(&req)).unwrap();
    h.settle();
    assert_eq!(h.ep.health().by_mid, 1);

    h.clock.set(10);
    thread::sleep(Duration::from_millis(100));
    h.settle();
    assert_eq!(h.conn.sent().len(), 6);

    h.clock.set(1_000);
    thread::sleep(Duration::from_millis(100));
    h.settle();
    assert!(h.ep.health().is_empty());
    assert!(!h.ep.shared.core().matcher.contains(id));
  }

  #[test]
  fn stop_forgets_exchanges() {
    let h = harness();
    sent_request(&h);
    assert!(!h.ep.health().is_empty());

    h.ep.stop();
    assert!(h.ep.health().is_empty());
    assert!(h.ep.shared.core().matcher.is_empty());
  }
}
