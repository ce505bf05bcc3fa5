use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::registry::ConnectionStateListener;

/// Data that came from (or is going to) a network peer
#[derive(PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the socket and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }
}

/// Receives raw datagrams from a [`Connector`].
///
/// Implementations are invoked on the connector's own thread(s)
/// and must not touch protocol state there; the endpoint's
/// implementation only enqueues a task.
pub trait InboundChannel: Send + Sync + Debug {
  /// A datagram arrived from a peer
  fn receive(&self, data: Addrd<Vec<u8>>);
}

/// The transport underneath an [`Endpoint`](crate::endpoint::Endpoint);
/// moves raw bytes between this machine and its peers.
///
/// This mirrors the `Socket` abstraction of `toad`, adjusted so that
/// receiving is push-based (via [`InboundChannel`]) and connection
/// lifecycle is owned by the connector.
pub trait Connector: Send + Sync + Debug {
  /// Start accepting & delivering datagrams
  fn start(&self) -> io::Result<()>;

  /// Stop delivering datagrams. A stopped connector may be started again.
  fn stop(&self);

  /// Release all resources held by the connector. Implies [`Connector::stop`].
  fn destroy(&self);

  /// Send a datagram to a remote address.
  ///
  /// Must be safe to call concurrently with inbound delivery.
  fn send(&self, data: Addrd<&[u8]>) -> nb::Result<(), io::Error>;

  /// Register the channel inbound datagrams are delivered to
  fn set_inbound_channel(&self, channel: Arc<dyn InboundChannel>);

  /// Register the listener told about peers connecting & disconnecting.
  ///
  /// Datagram connectors have no connections; the default ignores `listener`.
  fn set_connection_state_listener(&self, listener: Arc<dyn ConnectionStateListener>) {
    let _ = listener;
  }

  /// Address this connector is bound to
  fn local_addr(&self) -> SocketAddr;
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::test;

  #[test]
  fn addrd() {
    let addr = test::x.x.x.x(80);
    let a = Addrd(vec![1u8, 2], addr);
    assert_eq!(a.as_ref().map(|v| v.len()), Addrd(2, addr));
    assert_eq!(a.addr(), addr);
    assert_eq!(a.data(), &vec![1u8, 2]);
    assert_eq!(a.unwrap(), vec![1u8, 2]);
  }
}
