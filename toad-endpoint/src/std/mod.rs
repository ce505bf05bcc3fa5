use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use embedded_time::rate::Fraction;

use crate::net::{Addrd, Connector, InboundChannel};

pub(crate) fn io_to_nb(err: io::Error) -> nb::Error<io::Error> {
  match err.kind() {
    | io::ErrorKind::WouldBlock => nb::Error::WouldBlock,
    | _ => nb::Error::Other(err),
  }
}

/// Implement [`embedded_time::Clock`] using [`std::time`] primitives
#[derive(Debug, Clone, Copy)]
pub struct Clock(std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock {
  /// Create a new clock
  pub fn new() -> Self {
    Self(std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;

  // microseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<embedded_time::Instant<Self>, embedded_time::clock::Error> {
    let now = std::time::Instant::now();
    let elapsed = now.duration_since(self.0);
    Ok(embedded_time::Instant::new(elapsed.as_micros() as u64))
  }
}

/// Largest datagram the receive thread accepts
const MAX_DATAGRAM: usize = 65_535;

/// How often the receive thread checks whether it was stopped
const POLL: Duration = Duration::from_millis(50);

/// [`Connector`] over a [`std::net::UdpSocket`].
///
/// Datagrams are read on a dedicated thread and handed to the
/// inbound channel as-is.
pub struct UdpConnector {
  socket: UdpSocket,
  local: SocketAddr,
  channel: Mutex<Option<Arc<dyn InboundChannel>>>,
  running: Arc<AtomicBool>,
  receiver: Mutex<Option<JoinHandle<()>>>,
  destroyed: AtomicBool,
}

impl fmt::Debug for UdpConnector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("UdpConnector")
     .field("local", &self.local)
     .field("running", &self.running.load(Ordering::Relaxed))
     .finish()
  }
}

impl UdpConnector {
  /// Bind a socket to `addr`
  pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_read_timeout(Some(POLL))?;
    let local = socket.local_addr()?;

    Ok(Self { socket,
              local,
              channel: Mutex::new(None),
              running: Arc::new(AtomicBool::new(false)),
              receiver: Mutex::new(None),
              destroyed: AtomicBool::new(false) })
  }

  fn receive(socket: UdpSocket, running: Arc<AtomicBool>, channel: Arc<dyn InboundChannel>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::Acquire) {
      match socket.recv_from(&mut buf) {
        | Ok((n, addr)) => channel.receive(Addrd(buf[..n].to_vec(), addr)),
        | Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
          continue
        },
        | Err(e) => log::warn!("receiving on {:?} failed: {}", socket.local_addr(), e),
      }
    }
  }
}

impl Connector for UdpConnector {
  fn start(&self) -> io::Result<()> {
    if self.destroyed.load(Ordering::Acquire) {
      return Err(io::Error::new(io::ErrorKind::NotConnected, "connector was destroyed"));
    }

    let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
    if receiver.is_some() {
      return Ok(());
    }

    let channel = self.channel
                      .lock()
                      .unwrap_or_else(PoisonError::into_inner)
                      .clone()
                      .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidInput, "no inbound channel set")
                      })?;
    let socket = self.socket.try_clone()?;
    let running = self.running.clone();

    running.store(true, Ordering::Release);
    let spawned = thread::Builder::new().name(format!("udp {}", self.local))
                                        .spawn(move || Self::receive(socket, running, channel));
    match spawned {
      | Ok(handle) => {
        *receiver = Some(handle);
        log::debug!("listening on {}", self.local);
        Ok(())
      },
      | Err(e) => {
        self.running.store(false, Ordering::Release);
        Err(e)
      },
    }
  }

  fn stop(&self) {
    self.running.store(false, Ordering::Release);
    let handle = self.receiver
                     .lock()
                     .unwrap_or_else(PoisonError::into_inner)
                     .take();
    if let Some(handle) = handle {
      handle.join().ok();
    }
  }

  fn destroy(&self) {
    self.stop();
    self.destroyed.store(true, Ordering::Release);
  }

  fn send(&self, data: Addrd<&[u8]>) -> nb::Result<(), io::Error> {
    self.socket
        .send_to(data.data(), data.addr())
        .map(|_| ())
        .map_err(io_to_nb)
  }

  fn set_inbound_channel(&self, channel: Arc<dyn InboundChannel>) {
    *self.channel.lock().unwrap_or_else(PoisonError::into_inner) = Some(channel);
  }

  fn local_addr(&self) -> SocketAddr {
    self.local
  }
}

impl Drop for UdpConnector {
  fn drop(&mut self) {
    self.stop();
  }
}
