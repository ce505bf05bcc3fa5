use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use toad_msg::Type;

use crate::exchange::{Continuation,
                      Exchange,
                      ExchangeId,
                      ExchangeObserver,
                      KeyMid,
                      KeyToken,
                      KeyUri,
                      Origin};
use crate::msg::Message;
use crate::req::Req;
use crate::resp::Resp;
use crate::time::{elapsed, Millis};

type Table<K> = Mutex<HashMap<K, ExchangeId>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
  m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove `key` only if it still maps to `id`; a newer
/// exchange may have claimed the key since.
fn remove_if<K: Hash + Eq>(table: &Table<K>, key: &K, id: ExchangeId) -> bool {
  let mut table = lock(table);
  match table.get(key) {
    | Some(found) if *found == id => {
      table.remove(key);
      true
    },
    | _ => false,
  }
}

/// The three correlation tables
#[derive(Debug, Default)]
struct Tables {
  by_mid: Table<KeyMid>,
  by_token: Table<KeyToken>,
  by_uri: Table<KeyUri>,
}

impl Tables {
  fn health(&self) -> Health {
    Health { by_mid: lock(&self.by_mid).len(),
             by_token: lock(&self.by_token).len(),
             ongoing: lock(&self.by_uri).len() }
  }

  fn clear(&self) {
    let (mut mid, mut token, mut uri) = (lock(&self.by_mid), lock(&self.by_token), lock(&self.by_uri));
    mid.clear();
    token.clear();
    uri.clear();
  }
}

/// Sizes of the correlation tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Health {
  /// Entries keyed by message id
  pub by_mid: usize,
  /// Entries keyed by token
  pub by_token: usize,
  /// Ongoing blockwise transfers
  pub ongoing: usize,
}

impl Health {
  /// Are all tables empty?
  pub fn is_empty(&self) -> bool {
    self.by_mid == 0 && self.by_token == 0 && self.ongoing == 0
  }
}

impl fmt::Display for Health {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f,
           "Matcher state: {} exchangesByMID, {} exchangesByToken, {} ongoingExchanges",
           self.by_mid, self.by_token, self.ongoing)
  }
}

/// Read-only view of the matcher's tables that may be
/// inspected from any thread
#[derive(Debug, Clone)]
pub struct Monitor(Arc<Tables>);

impl Monitor {
  /// See [`Health`]
  pub fn health(&self) -> Health {
    self.0.health()
  }
}

/// Removes an exchange's keys from the tables when it completes
#[derive(Debug)]
struct Cleanup(Arc<Tables>);

impl ExchangeObserver for Cleanup {
  fn completed(&self, ex: &Exchange) {
    let id = ex.id();
    let tables = &self.0;
    let requests = ex.request().into_iter().chain(ex.current_request());

    match ex.origin() {
      | Origin::Local => {
        for req in requests {
          remove_if(&tables.by_token, &KeyToken::of(req.msg()), id);
          if let Some(key) = KeyMid::of(req.msg()) {
            remove_if(&tables.by_mid, &key, id);
          }
        }
      },
      | Origin::Remote => {
        for req in requests {
          remove_if(&tables.by_uri, &KeyUri::new(req.msg(), Continuation::Request), id);
          remove_if(&tables.by_uri, &KeyUri::new(req.msg(), Continuation::Response), id);
        }

        if let Some(key) = ex.response().and_then(|r| KeyMid::of(r.msg())) {
          remove_if(&tables.by_mid, &key, id);
        }

        if let Some(rel) = ex.relation() {
          for key in rel.drain_notifications() {
            remove_if(&tables.by_mid, &key, id);
          }
          rel.cancel();
        }
      },
    }

    log::trace!("forgot exchange {}", id);
  }
}

/// Correlates inbound messages with the [`Exchange`]s they
/// belong to, and owns every live exchange.
///
/// Exchanges are checked out while a message involving them
/// moves through the layer pipeline and checked back in after;
/// an exchange that completed in the meantime is dropped on check-in.
#[derive(Debug)]
pub struct Matcher {
  tables: Arc<Tables>,
  cleanup: Arc<Cleanup>,
  exchanges: HashMap<ExchangeId, Exchange>,
  ids: Arc<AtomicU64>,
}

impl Default for Matcher {
  fn default() -> Self {
    Self::new()
  }
}

impl Matcher {
  /// Create an empty matcher
  pub fn new() -> Self {
    let tables = Arc::new(Tables::default());
    Self { cleanup: Arc::new(Cleanup(tables.clone())),
           tables,
           exchanges: Default::default(),
           ids: Arc::new(AtomicU64::new(1)) }
  }

  /// Source of [`ExchangeId`]s, shareable with threads that
  /// need to name an exchange before it exists
  pub(crate) fn ids(&self) -> Arc<AtomicU64> {
    self.ids.clone()
  }

  pub(crate) fn next_id(ids: &AtomicU64) -> ExchangeId {
    ExchangeId(ids.fetch_add(1, Ordering::Relaxed))
  }

  /// See [`Monitor`]
  pub fn monitor(&self) -> Monitor {
    Monitor(self.tables.clone())
  }

  /// See [`Health`]
  pub fn health(&self) -> Health {
    self.tables.health()
  }

  /// Number of live exchanges
  pub fn len(&self) -> usize {
    self.exchanges.len()
  }

  /// Are there no live exchanges?
  pub fn is_empty(&self) -> bool {
    self.exchanges.is_empty()
  }

  /// Attach the completion hook that removes `ex`'s keys
  pub(crate) fn observe(&self, ex: &mut Exchange) {
    ex.set_observer(self.cleanup.clone());
  }

  /// Lend an exchange out for processing
  pub(crate) fn check_out(&mut self, id: ExchangeId) -> Option<Exchange> {
    self.exchanges.remove(&id)
  }

  /// Take an exchange back, dropping it if it completed
  pub(crate) fn check_in(&mut self, ex: Exchange) {
    if !ex.is_complete() {
      self.exchanges.insert(ex.id(), ex);
    }
  }

  /// Is an exchange live (and not currently checked out)?
  pub fn contains(&self, id: ExchangeId) -> bool {
    self.exchanges.contains_key(&id)
  }

  fn create_remote(&mut self, now: Millis) -> ExchangeId {
    let mut ex = Exchange::new(Self::next_id(&self.ids), Origin::Remote, now);
    self.observe(&mut ex);
    let id = ex.id();
    self.exchanges.insert(id, ex);
    id
  }

  /// Index an outbound request by message id & token
  pub(crate) fn register_outbound_request(&self, ex: &mut Exchange, req: &Req) {
    let id = ex.id();
    self.observe(ex);
    ex.set_current_request(req.clone());

    if let Some(key) = KeyMid::of(req.msg()) {
      lock(&self.tables.by_mid).insert(key, id);
    }
    lock(&self.tables.by_token).insert(KeyToken::of(req.msg()), id);

    log::trace!("tracking outbound request {:?} on exchange {}",
                req.msg_id(),
                id);
  }

  /// Index an outbound response, and complete the exchange
  /// if nothing further is expected on it
  pub(crate) fn register_outbound_response(&self, ex: &mut Exchange, resp: &Resp) {
    let id = ex.id();
    let msg = resp.msg();
    ex.set_response(resp.clone());

    let relation = ex.relation();
    if let (Some(rel), Type::Con | Type::Ack) = (relation.as_ref(), msg.ty) {
      // a reliable notification supersedes every NON one before it
      for key in rel.drain_notifications() {
        remove_if(&self.tables.by_mid, &key, id);
      }
    }

    if let Some(req) = ex.current_request() {
      let key = KeyUri::new(req.msg(), Continuation::Response);
      if resp.has_continuation() && !resp.is_notification() {
        lock(&self.tables.by_uri).insert(key, id);
      } else {
        remove_if(&self.tables.by_uri, &key, id);
      }

      if msg.is_last() {
        remove_if(&self.tables.by_uri,
                  &KeyUri::new(req.msg(), Continuation::Request),
                  id);
      }
    }

    if let (Some(key), Type::Con | Type::Non) = (KeyMid::of(msg), msg.ty) {
      lock(&self.tables.by_mid).insert(key, id);
      if let (Some(rel), Type::Non) = (relation.as_ref(), msg.ty) {
        rel.add_notification(key);
      }
    }

    if matches!(msg.ty, Type::Ack | Type::Non) && msg.is_last() {
      ex.set_complete();
    }
  }

  /// An empty message is going out on an exchange;
  /// rejecting a peer's message ends the exchange
  pub(crate) fn register_outbound_empty(&self, ex: &mut Exchange, msg: &Message) {
    if msg.ty == Type::Reset {
      ex.set_complete();
    }
  }

  /// Find or create the exchange an inbound request belongs to.
  ///
  /// Requests that do not continue a blockwise transfer always
  /// start a new exchange.
  pub(crate) fn correlate_inbound_request(&mut self, req: &Req, now: Millis) -> ExchangeId {
    if !req.has_continuation() {
      return self.create_remote(now);
    }

    let key = KeyUri::continued_by(req.msg());
    let ongoing = lock(&self.tables.by_uri).get(&key).copied();
    match ongoing {
      | Some(id) if self.exchanges.contains_key(&id) => {
        log::trace!("{:?} continues exchange {}", key, id);
        id
      },
      | _ => {
        let id = self.create_remote(now);
        lock(&self.tables.by_uri).insert(key, id);
        id
      },
    }
  }

  /// Find the local exchange an inbound response answers
  pub(crate) fn correlate_inbound_response(&self, resp: &Resp) -> Option<ExchangeId> {
    let msg = resp.msg();
    let id = match lock(&self.tables.by_token).get(&KeyToken::of(msg)).copied() {
      | Some(id) => id,
      | None => {
        log::trace!("no exchange with token {:?} for {}",
                    msg.token_bytes(),
                    msg.peer);
        return None;
      },
    };

    let ex = self.exchanges.get(&id)?;

    if let Some(key) = KeyMid::of(msg) {
      remove_if(&self.tables.by_mid, &key, id);
    }

    let current = ex.current_request().and_then(Req::msg_id);
    if msg.ty == Type::Ack && msg.id != current {
      log::warn!("possible MID reuse before lifetime end for token {:?}, expected MID {:?} but received {:?}",
                 msg.token_bytes(),
                 current,
                 msg.id);
      return None;
    }

    Some(id)
  }

  /// Find the exchange an inbound ACK or RST refers to
  pub(crate) fn correlate_inbound_empty(&self, msg: &Message) -> Option<ExchangeId> {
    let key = KeyMid::of(msg)?;
    let id = lock(&self.tables.by_mid).remove(&key)?;
    if self.exchanges.contains_key(&id) {
      Some(id)
    } else {
      log::trace!("{:?} refers to exchange {} which is gone", key, id);
      None
    }
  }

  /// Complete every exchange older than `lifetime`, except
  /// those kept open by an observe relation
  pub(crate) fn sweep(&mut self, now: Millis, lifetime: Millis) -> usize {
    let stale = self.exchanges
                    .values()
                    .filter(|ex| elapsed(ex.timestamp(), now) >= lifetime)
                    .filter(|ex| {
                      let observed = ex.relation().map(|r| !r.is_canceled()).unwrap_or(false);
                      !observed && !ex.is_observing()
                    })
                    .map(Exchange::id)
                    .collect::<Vec<_>>();

    for id in stale.iter() {
      if let Some(mut ex) = self.exchanges.remove(id) {
        log::debug!("exchange {} outlived its lifetime", id);
        ex.set_complete();
      }
    }

    stale.len()
  }

  /// Forget every exchange and empty every table
  pub(crate) fn clear(&mut self) {
    self.tables.clear();
    self.exchanges.clear();
  }
}
