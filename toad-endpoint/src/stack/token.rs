use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tinyvec::ArrayVec;
use toad_msg::Token;

use super::{Cx, Layer};
use crate::exchange::Exchange;
use crate::req::Req;
use crate::resp::Resp;

/// Gives outbound requests without a token a random 8-byte one,
/// and makes sure responses echo the token of their request.
///
/// Randomness is seeded from [`Msg::token_seed`](crate::config::Msg::token_seed)
/// mixed with the time of the first request.
#[derive(Debug)]
pub struct TokenLayer {
  seed: u16,
  rand: Option<ChaCha8Rng>,
}

impl TokenLayer {
  /// Create a token layer
  pub fn new(seed: u16) -> Self {
    Self { seed, rand: None }
  }

  fn next(&mut self, now: u64) -> Token {
    let seed = self.seed;
    let rand = self.rand
                   .get_or_insert_with(|| ChaCha8Rng::seed_from_u64(((seed as u64) << 48) ^ now));
    Token(ArrayVec::from(rand.gen::<u64>().to_be_bytes()))
  }
}

impl Layer for TokenLayer {
  fn send_request(&mut self, _: &mut Exchange, mut req: Req, cx: &mut Cx<'_>) -> Option<Req> {
    if req.msg().token_bytes().is_empty() {
      req.msg_mut().token = self.next(cx.now().0);
    }
    Some(req)
  }

  fn send_response(&mut self, ex: &mut Exchange, mut resp: Resp, _: &mut Cx<'_>) -> Option<Resp> {
    let token = ex.current_request().or_else(|| ex.request()).map(Req::msg_token);
    match token {
      | Some(token) if resp.msg().token != token => {
        log::debug!("response token {:?} does not match its request; fixing",
                    resp.msg().token_bytes());
        resp.msg_mut().token = token;
      },
      | _ => (),
    }
    Some(resp)
  }
}

#[cfg(test)]
mod test {
  use embedded_time::duration::Milliseconds;

  use super::*;
  use crate::config::Config;
  use crate::exchange::{ExchangeId, Origin};
  use crate::test;

  #[test]
  fn assigns_distinct_tokens() {
    let mut layer = TokenLayer::new(0);
    let config = Config::default();
    let mut cx = Cx::new(Milliseconds(10), &config, ExchangeId(1));
    let mut ex = Exchange::new(ExchangeId(1), Origin::Local, Milliseconds(0));

    let a = layer.send_request(&mut ex, Req::get(test::x.x.x.x(1), "a"), &mut cx)
                 .unwrap();
    let b = layer.send_request(&mut ex, Req::get(test::x.x.x.x(1), "a"), &mut cx)
                 .unwrap();
    assert_eq!(a.msg().token_bytes().len(), 8);
    assert_ne!(a.msg().token, b.msg().token);
  }

  #[test]
  fn keeps_existing_token() {
    let mut layer = TokenLayer::new(0);
    let config = Config::default();
    let mut cx = Cx::new(Milliseconds(10), &config, ExchangeId(1));
    let mut ex = Exchange::new(ExchangeId(1), Origin::Local, Milliseconds(0));

    let mut req = Req::get(test::x.x.x.x(1), "a");
    req.msg_mut().token = test::token(&[1, 2]);
    let req = layer.send_request(&mut ex, req, &mut cx).unwrap();
    assert_eq!(req.msg().token, test::token(&[1, 2]));
  }

  #[test]
  fn responses_echo_request_token() {
    let mut layer = TokenLayer::new(0);
    let config = Config::default();
    let mut cx = Cx::new(Milliseconds(10), &config, ExchangeId(1));
    let mut ex = Exchange::new(ExchangeId(1), Origin::Remote, Milliseconds(0));

    let mut req = Req::get(test::x.x.x.x(1), "a");
    req.msg_mut().token = test::token(&[3]);
    ex.set_current_request(req.clone());

    let mut resp = Resp::for_request(&req);
    resp.msg_mut().token = test::token(&[4]);
    let resp = layer.send_response(&mut ex, resp, &mut cx).unwrap();
    assert_eq!(resp.msg().token, test::token(&[3]));
  }
}
