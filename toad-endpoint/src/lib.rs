//! `toad-endpoint` is the message-processing core of a CoAP endpoint:
//! it sits between a transport and the application and takes care of
//! everything that turns a stream of datagrams into request/response
//! interactions.
//!
//! ## CoAP
//! CoAP is an application-level network protocol that copies the semantics of HTTP
//! to an environment conducive to **constrained** devices. (weak hardware, small battery capacity, etc.)
//!
//! Because CoAP customarily sits on top of UDP, the endpoint has to do what TCP
//! & HTTP do for you elsewhere:
//! - retransmit confirmable messages until they are acknowledged
//! - recognize retransmissions of messages it already processed
//! - correlate responses to requests (by message id and by token)
//! - split large bodies into blocks and put them back together ([RFC 7959](https://datatracker.ietf.org/doc/html/rfc7959))
//! - keep observe relations and order their notifications ([RFC 7641](https://datatracker.ietf.org/doc/html/rfc7641))
//!
//! ## Shape
//! An [`Endpoint`] owns a [`Connector`](net::Connector) (the transport),
//! a [`Matcher`](matcher::Matcher) (the correlation tables) and a
//! [`Stack`](stack::Stack) of protocol layers. All protocol work runs on
//! a single-threaded [`Executor`](executor::Executor); the application
//! receives messages through a [`Deliverer`](deliver::Deliverer) and
//! sends them through an [`EndpointHandle`](endpoint::EndpointHandle).
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use toad_endpoint::config::Config;
//! use toad_endpoint::deliver::Deliverer;
//! use toad_endpoint::endpoint::{Endpoint, EndpointHandle};
//! use toad_endpoint::exchange::Exchange;
//! use toad_endpoint::executor::Executor;
//! use toad_endpoint::resp::Resp;
//! use toad_endpoint::std::UdpConnector;
//!
//! #[derive(Debug)]
//! struct Hello(EndpointHandle);
//!
//! impl Deliverer for Hello {
//!   fn deliver_request(&mut self, ex: &Exchange) {
//!     if let Some(req) = ex.request() {
//!       let mut resp = Resp::for_request(req);
//!       resp.msg_mut().set_payload("hello".bytes());
//!       self.0.send_response(ex.id(), resp).ok();
//!     }
//!   }
//!
//!   fn deliver_response(&mut self, _: &Exchange, _: &Resp) {}
//! }
//!
//! let connector = Arc::new(UdpConnector::bind("0.0.0.0:5683").unwrap());
//! let endpoint = Endpoint::new(connector, Config::default());
//! endpoint.set_deliverer(Hello(endpoint.handle()));
//! endpoint.set_executor(Executor::new("coap").unwrap());
//! endpoint.start().unwrap();
//! ```

// -
// style
#![allow(clippy::unused_unit)]
// -
// deny
#![warn(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]

#[cfg(test)]
pub(crate) mod test;

pub(crate) mod logging;

/// configuring runtime behavior
pub mod config;

/// errors
pub mod error;

/// time abstractions
pub mod time;

/// customizable retrying of fallible operations
pub mod retry;

/// network abstractions
pub mod net;

/// messages & options
pub mod msg;

/// requests
pub mod req;

/// responses
pub mod resp;

/// turning datagrams into messages and back
pub mod codec;

/// exchanges & the keys they are found by
pub mod exchange;

/// observe relations
pub mod observe;

/// correlating messages with exchanges
pub mod matcher;

/// # Protocol layers
///
/// Every message an endpoint sends or receives travels through an
/// ordered pipeline of [`Layer`](crate::stack::Layer)s. Outbound messages
/// move from the application toward the transport, inbound ones the other way.
///
/// Layers never perform IO themselves; they forward, swallow or
/// originate messages and ask for timers, and the endpoint carries
/// all of that out once the traversal is over.
pub mod stack;

/// handing inbound messages to the application
pub mod deliver;

/// observing & canceling messages in flight
pub mod interceptor;

/// the single-threaded task runner protocol work runs on
pub mod executor;

/// the endpoint
pub mod endpoint;

/// per-peer clients for connection-oriented transports
pub mod registry;

/// `std`-only runtime pieces: a clock and a UDP connector
pub mod std;

#[doc(inline)]
pub use endpoint::{Endpoint, EndpointHandle};
#[doc(inline)]
pub use error::Error;
