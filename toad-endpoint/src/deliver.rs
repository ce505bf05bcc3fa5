use std::fmt::Debug;

use crate::exchange::Exchange;
use crate::resp::Resp;

/// The application's side of an endpoint.
///
/// Invoked on the endpoint's executor; implementations must not block
/// it for long. To answer a request, hand the exchange's id and a
/// response to an [`EndpointHandle`](crate::endpoint::EndpointHandle).
pub trait Deliverer: Send + Debug {
  /// A (fully reassembled) request arrived
  fn deliver_request(&mut self, exchange: &Exchange);

  /// A (fully reassembled) response or notification arrived
  /// for a request we sent
  fn deliver_response(&mut self, exchange: &Exchange, response: &Resp);

  /// A request we sent was never acknowledged
  fn timed_out(&mut self, exchange: &Exchange) {
    log::debug!("exchange {} timed out", exchange.id());
  }

  /// A peer rejected (RST) a message we sent
  fn rejected(&mut self, exchange: &Exchange) {
    log::debug!("exchange {} rejected", exchange.id());
  }
}
