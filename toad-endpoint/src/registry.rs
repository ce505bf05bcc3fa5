use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::endpoint::EndpointHandle;
use crate::error::Error;
use crate::exchange::ExchangeId;
use crate::req::Req;
use crate::time::Clock;

/// Whether a stateful connector holds a connection to a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
  /// A peer connected to us
  Connected,
  /// A peer's connection went away
  Disconnected,
}

/// Told about connections opening & closing.
///
/// Connection-oriented [`Connector`](crate::net::Connector)s invoke this;
/// datagram connectors have no connections and never do.
pub trait ConnectionStateListener: Send + Sync + Debug {
  #[allow(missing_docs)]
  fn on_state_change(&self, peer: SocketAddr, state: ConnectionState);
}

/// Sends requests to one peer through an endpoint
pub struct Client<Clk = crate::std::Clock>
  where Clk: Clock + Send + Sync + 'static
{
  peer: SocketAddr,
  handle: EndpointHandle<Clk>,
  confirmable: bool,
}

impl<Clk> Debug for Client<Clk> where Clk: Clock + Send + Sync + 'static
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Client")
     .field("peer", &self.peer)
     .field("confirmable", &self.confirmable)
     .finish()
  }
}

impl<Clk> Client<Clk> where Clk: Clock + Send + Sync + 'static
{
  /// A client for `peer`, sending CON requests
  pub fn new(peer: SocketAddr, handle: EndpointHandle<Clk>) -> Self {
    Self { peer,
           handle,
           confirmable: true }
  }

  /// The peer this client talks to
  pub fn peer(&self) -> SocketAddr {
    self.peer
  }

  /// Send NON requests instead of CON
  pub fn set_confirmable(&mut self, confirmable: bool) {
    self.confirmable = confirmable;
  }

  /// GET `path`
  pub fn get(&self, path: impl AsRef<str>) -> Result<ExchangeId, Error> {
    self.send(Req::get(self.peer, path))
  }

  /// POST `payload` to `path`
  pub fn post(&self,
              path: impl AsRef<str>,
              payload: impl IntoIterator<Item = u8>)
              -> Result<ExchangeId, Error> {
    let mut req = Req::post(self.peer, path);
    req.msg_mut().set_payload(payload);
    self.send(req)
  }

  /// Send a request to this client's peer (whatever its destination said)
  pub fn send(&self, mut req: Req) -> Result<ExchangeId, Error> {
    req.msg_mut().peer = self.peer;
    if !self.confirmable {
      req.non();
    }
    self.handle.send_request(req)
  }
}

type Configure<Clk> = Box<dyn Fn(&mut Client<Clk>) + Send + Sync>;

/// Keeps a [`Client`] for every peer currently connected to
/// a connection-oriented endpoint.
///
/// Register it with [`Connector::set_connection_state_listener`](crate::net::Connector::set_connection_state_listener);
/// clients appear when peers connect and vanish when they disconnect.
pub struct ClientRegistry<Clk = crate::std::Clock>
  where Clk: Clock + Send + Sync + 'static
{
  handle: EndpointHandle<Clk>,
  configure: Option<Configure<Clk>>,
  clients: Mutex<HashMap<SocketAddr, Arc<Client<Clk>>>>,
}

impl<Clk> Debug for ClientRegistry<Clk> where Clk: Clock + Send + Sync + 'static
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ClientRegistry")
     .field("clients", &self.peers())
     .finish()
  }
}

impl<Clk> ClientRegistry<Clk> where Clk: Clock + Send + Sync + 'static
{
  /// Create an empty registry whose clients send through `handle`
  pub fn new(handle: EndpointHandle<Clk>) -> Self {
    Self { handle,
           configure: None,
           clients: Mutex::new(HashMap::new()) }
  }

  /// Adjust every client created from now on
  pub fn with_configure(mut self, f: impl Fn(&mut Client<Clk>) + Send + Sync + 'static) -> Self {
    self.configure = Some(Box::new(f));
    self
  }

  fn clients(&self) -> MutexGuard<'_, HashMap<SocketAddr, Arc<Client<Clk>>>> {
    self.clients.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The client for `peer`, if it is connected
  pub fn get(&self, peer: SocketAddr) -> Option<Arc<Client<Clk>>> {
    self.clients().get(&peer).cloned()
  }

  /// Is `peer` connected?
  pub fn contains(&self, peer: SocketAddr) -> bool {
    self.clients().contains_key(&peer)
  }

  /// Forget the client for `peer`
  pub fn remove(&self, peer: SocketAddr) -> Option<Arc<Client<Clk>>> {
    self.clients().remove(&peer)
  }

  /// Forget all clients
  pub fn clear(&self) {
    self.clients().clear();
  }

  /// Connected peers
  pub fn peers(&self) -> Vec<SocketAddr> {
    self.clients().keys().copied().collect()
  }

  /// Number of connected peers
  pub fn len(&self) -> usize {
    self.clients().len()
  }

  /// Is no peer connected?
  pub fn is_empty(&self) -> bool {
    self.clients().is_empty()
  }
}

impl<Clk> ConnectionStateListener for ClientRegistry<Clk> where Clk: Clock + Send + Sync + 'static
{
  fn on_state_change(&self, peer: SocketAddr, state: ConnectionState) {
    log::debug!("connection to {} is now {:?}", peer, state);
    match state {
      | ConnectionState::Connected => {
        let mut client = Client::new(peer, self.handle.clone());
        if let Some(configure) = self.configure.as_ref() {
          configure(&mut client);
        }
        self.clients().insert(peer, Arc::new(client));
      },
      | ConnectionState::Disconnected => {
        self.clients().remove(&peer);
      },
    }
  }
}
