use std::fmt::Debug;

use crate::logging::msg_summary;
use crate::msg::Message;
use crate::req::Req;
use crate::resp::Resp;

/// Observes (and may cancel) every message an endpoint sends or receives.
///
/// Outbound hooks run after the matcher has registered the message
/// and before it is serialized; inbound hooks run after parsing and
/// before correlation. Invoking [`Message::cancel`] stops the message
/// right there, without it being treated as an error.
///
/// Interceptors run on the endpoint's executor for every single
/// message, so they should be cheap.
pub trait Interceptor: Send + Debug {
  /// A request is about to be sent
  fn send_request(&mut self, req: &mut Req) {
    let _ = req;
  }

  /// A response is about to be sent
  fn send_response(&mut self, resp: &mut Resp) {
    let _ = resp;
  }

  /// An empty message (ACK, RST or ping) is about to be sent
  fn send_empty(&mut self, msg: &mut Message) {
    let _ = msg;
  }

  /// A request arrived
  fn receive_request(&mut self, req: &mut Req) {
    let _ = req;
  }

  /// A response arrived
  fn receive_response(&mut self, resp: &mut Resp) {
    let _ = resp;
  }

  /// An empty message arrived
  fn receive_empty(&mut self, msg: &mut Message) {
    let _ = msg;
  }
}

/// Identifies an interceptor added to an endpoint, for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterceptorId(u64);

/// Interceptors in the order they were added
#[derive(Debug, Default)]
pub(crate) struct Interceptors {
  next: u64,
  all: Vec<(InterceptorId, Box<dyn Interceptor>)>,
}

impl Interceptors {
  pub(crate) fn add(&mut self, interceptor: Box<dyn Interceptor>) -> InterceptorId {
    let id = InterceptorId(self.next);
    self.next += 1;
    self.all.push((id, interceptor));
    id
  }

  pub(crate) fn remove(&mut self, id: InterceptorId) -> bool {
    let before = self.all.len();
    self.all.retain(|(i, _)| *i != id);
    self.all.len() != before
  }

  pub(crate) fn len(&self) -> usize {
    self.all.len()
  }

  fn each(&mut self, mut f: impl FnMut(&mut dyn Interceptor)) {
    self.all.iter_mut().for_each(|(_, i)| f(i.as_mut()));
  }

  pub(crate) fn send_request(&mut self, req: &mut Req) {
    self.each(|i| i.send_request(req));
  }

  pub(crate) fn send_response(&mut self, resp: &mut Resp) {
    self.each(|i| i.send_response(resp));
  }

  pub(crate) fn send_empty(&mut self, msg: &mut Message) {
    self.each(|i| i.send_empty(msg));
  }

  pub(crate) fn receive_request(&mut self, req: &mut Req) {
    self.each(|i| i.receive_request(req));
  }

  pub(crate) fn receive_response(&mut self, resp: &mut Resp) {
    self.each(|i| i.receive_response(resp));
  }

  pub(crate) fn receive_empty(&mut self, msg: &mut Message) {
    self.each(|i| i.receive_empty(msg));
  }
}

/// Logs every message in both directions at `trace`
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageTracer;

impl MessageTracer {
  fn trace(dir: &str, msg: &Message) {
    log::trace!("{} {} {}", dir, msg.peer, msg_summary(msg));
  }
}

impl Interceptor for MessageTracer {
  fn send_request(&mut self, req: &mut Req) {
    Self::trace("->", req.msg());
  }

  fn send_response(&mut self, resp: &mut Resp) {
    Self::trace("->", resp.msg());
  }

  fn send_empty(&mut self, msg: &mut Message) {
    Self::trace("->", msg);
  }

  fn receive_request(&mut self, req: &mut Req) {
    Self::trace("<-", req.msg());
  }

  fn receive_response(&mut self, resp: &mut Resp) {
    Self::trace("<-", resp.msg());
  }

  fn receive_empty(&mut self, msg: &mut Message) {
    Self::trace("<-", msg);
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::test;

  #[derive(Debug)]
  struct CancelPosts;

  impl Interceptor for CancelPosts {
    fn send_request(&mut self, req: &mut Req) {
      if req.method() == crate::req::method::POST {
        req.msg_mut().cancel();
      }
    }
  }

  #[test]
  fn runs_every_interceptor() {
    let mut all = Interceptors::default();
    all.add(Box::new(CancelPosts));
    all.add(Box::new(MessageTracer));

    let mut get = Req::get(test::x.x.x.x(1), "a");
    let mut post = Req::post(test::x.x.x.x(1), "a");
    all.send_request(&mut get);
    all.send_request(&mut post);

    assert!(!get.msg().is_canceled());
    assert!(post.msg().is_canceled());
  }

  #[test]
  fn remove() {
    let mut all = Interceptors::default();
    let a = all.add(Box::new(MessageTracer));
    let b = all.add(Box::new(CancelPosts));
    assert_ne!(a, b);

    assert!(all.remove(b));
    assert!(!all.remove(b));
    assert_eq!(all.len(), 1);

    let mut post = Req::post(test::x.x.x.x(1), "a");
    all.send_request(&mut post);
    assert!(!post.msg().is_canceled());
  }
}
