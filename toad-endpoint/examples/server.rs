use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

use toad_endpoint::config::Config;
use toad_endpoint::deliver::Deliverer;
use toad_endpoint::endpoint::{Endpoint, EndpointHandle};
use toad_endpoint::exchange::Exchange;
use toad_endpoint::executor::Executor;
use toad_endpoint::interceptor::MessageTracer;
use toad_endpoint::req::{method, Req};
use toad_endpoint::resp::{code, Resp};
use toad_endpoint::std::UdpConnector;

/// Answers `GET /hello`, and 4.04s everything else
#[derive(Debug)]
struct Hello(EndpointHandle);

impl Deliverer for Hello {
  fn deliver_request(&mut self, ex: &Exchange) {
    let req = match ex.request() {
      | Some(req) => req,
      | None => return,
    };

    let mut resp = Resp::for_request(req);
    if req.method() == method::GET && req.msg().path() == "hello" {
      resp.msg_mut().set_payload("hello, world!".bytes());
    } else {
      resp.set_code(code::NOT_FOUND);
    }

    if let Err(e) = self.0.send_response(ex.id(), resp) {
      log::error!("could not respond: {}", e);
    }
  }

  fn deliver_response(&mut self, _: &Exchange, _: &Resp) {}
}

/// Forwards responses to the main thread
#[derive(Debug)]
struct Forward(Sender<Resp>);

impl Deliverer for Forward {
  fn deliver_request(&mut self, _: &Exchange) {}

  fn deliver_response(&mut self, _: &Exchange, resp: &Resp) {
    self.0.send(resp.clone()).ok();
  }
}

fn endpoint(addr: &str) -> Endpoint {
  let connector = Arc::new(UdpConnector::bind(addr).unwrap());
  let endpoint = Endpoint::new(connector, Config::default());
  endpoint.set_executor(Executor::new(addr).unwrap());
  endpoint.add_interceptor(MessageTracer);
  endpoint
}

pub fn main() {
  simple_logger::init_with_level(log::Level::Trace).unwrap();

  let server = endpoint("127.0.0.1:5683");
  server.set_deliverer(Hello(server.handle()));
  server.start().unwrap();

  let (tx, rx) = mpsc::channel();
  let client = endpoint("127.0.0.1:0");
  client.set_deliverer(Forward(tx));
  client.start().unwrap();

  client.send_request(Req::get(server.local_addr(), "hello"))
        .unwrap();

  let resp = rx.recv_timeout(Duration::from_secs(10)).unwrap();
  assert_eq!(resp.code(), code::CONTENT);
  log::info!("server said {:?}", resp.msg().payload_str());

  client.destroy();
  server.destroy();
}
