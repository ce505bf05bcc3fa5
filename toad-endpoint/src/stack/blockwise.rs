use toad_msg::{Code, Token};

use super::{Cx, Layer};
use crate::exchange::{Exchange, Origin};
use crate::msg::opt::{encode_uint, known};
use crate::msg::{Block, Message};
use crate::req::Req;
use crate::resp::{code, Resp};

fn block_size(szx: u8) -> usize {
  1 << (szx.min(6) + 4)
}

/// Bytes of block `num` of `body`, and whether more follow.
///
/// `None` when the block starts past the end of the body;
/// block 0 of an empty body is empty.
fn slice(body: &[u8], num: u32, szx: u8) -> Option<(&[u8], bool)> {
  let size = block_size(szx);
  let start = num as usize * size;
  if start > 0 && start >= body.len() {
    return None;
  }

  let end = (start + size).min(body.len());
  Some((&body[start..end], end < body.len()))
}

/// Progress of one blockwise transfer on an exchange
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BlockStatus {
  /// Size exponent in use
  pub(crate) szx: u8,
  /// Next block to send or expect
  pub(crate) num: u32,
  /// Body reassembled so far (receiving), or the whole body (sending)
  pub(crate) body: Vec<u8>,
  /// Sending: the message being fragmented.
  /// Receiving a response: the first fragment.
  pub(crate) template: Option<Message>,
  /// Receiving a request: the last block arrived
  pub(crate) complete: bool,
}

impl BlockStatus {
  fn receiving(szx: u8) -> Self {
    Self { szx,
           num: 0,
           body: vec![],
           template: None,
           complete: false }
  }

  fn sending(msg: &Message, szx: u8) -> Self {
    Self { szx,
           num: 0,
           body: msg.payload.clone(),
           template: Some(msg.clone()),
           complete: false }
  }

  fn is_sending(&self) -> bool {
    self.template.is_some() && !self.body.is_empty()
  }
}

/// Fragments bodies larger than the preferred block size and
/// reassembles fragmented bodies (RFC 7959), in both roles:
///
/// - as a server it collects Block1 request bodies, answering
///   `2.31 Continue` until the last block arrives, and serves
///   large responses one Block2 block per follow-up request;
/// - as a client it sends large request bodies block by block and
///   fetches the rest of a fragmented response.
///
/// Only complete bodies reach the application.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blockwise;

impl Blockwise {
  fn preferred_szx(cx: &Cx<'_>) -> u8 {
    Block::szx_for(cx.config().block.preferred_size)
  }

  fn reply(req: &Req, code: Code) -> Resp {
    let mut resp = Resp::for_request(req);
    resp.set_code(code);
    resp
  }

  fn refuse(req: &Req, code: Code, cx: &mut Cx<'_>) {
    log::debug!("refusing blockwise request from {}: {}",
                req.msg().peer,
                code::to_human(code));
    let resp = Self::reply(req, code);
    cx.send_response(resp);
  }

  fn receive_block1(ex: &mut Exchange, req: Req, block: Block, cx: &mut Cx<'_>) -> Option<Req> {
    let max = cx.config().block.max_body_size;
    if block.num == 0 {
      ex.request_block_status = Some(BlockStatus::receiving(block.szx));
    }

    let status = match ex.request_block_status.as_mut() {
      | Some(status) => status,
      | None => {
        Self::refuse(&req, code::REQUEST_ENTITY_INCOMPLETE, cx);
        return None;
      },
    };

    if block.num < status.num {
      log::trace!("block {} of {} again", block.num, req.msg().resource());
      if block.more {
        let mut cont = Self::reply(&req, code::CONTINUE);
        cont.msg_mut().set_block1(block);
        cont.msg_mut().set_last(false);
        cx.send_response(cont);
      }
      return None;
    }

    if block.num > status.num || block.szx != status.szx {
      ex.request_block_status = None;
      Self::refuse(&req, code::REQUEST_ENTITY_INCOMPLETE, cx);
      return None;
    }

    status.body.extend_from_slice(&req.msg().payload);
    if status.body.len() > max {
      ex.request_block_status = None;
      let mut resp = Self::reply(&req, code::REQUEST_ENTITY_TOO_LARGE);
      resp.msg_mut().set(known::SIZE1, encode_uint(max as u32));
      cx.send_response(resp);
      return None;
    }

    status.num += 1;

    if block.more {
      let mut cont = Self::reply(&req, code::CONTINUE);
      cont.msg_mut().set_block1(block);
      cont.msg_mut().set_last(false);
      cx.send_response(cont);
      return None;
    }

    status.complete = true;
    let mut whole = req;
    whole.msg_mut().payload = core::mem::take(&mut status.body);
    Some(whole)
  }

  /// Serve a block of a response body we are already sending
  fn serve_block2(ex: &mut Exchange, req: &Req, block: Block, cx: &mut Cx<'_>) {
    let status = match ex.response_block_status.as_ref() {
      | Some(status) => status,
      | None => return,
    };

    let szx = block.szx.min(status.szx);
    let mut base = Resp::for_request(req);
    if let Some(template) = status.template.as_ref() {
      base.set_code(template.code);
      base.msg_mut().opts = template.opts.clone();
      base.msg_mut().remove(known::OBSERVE);
    }

    match Self::fragment(base, &status.body, block.num, szx) {
      | Some(resp) => cx.send_response(resp),
      | None => Self::refuse(req, code::BAD_REQUEST, cx),
    }
  }

  /// `base` carrying only block `num` of `body`
  fn fragment(mut base: Resp, body: &[u8], num: u32, szx: u8) -> Option<Resp> {
    let (bytes, more) = slice(body, num, szx)?;
    let msg = base.msg_mut();
    msg.payload = bytes.to_vec();
    msg.set_block2(Block { num, more, szx });
    if num == 0 {
      msg.set_size2(body.len() as u32);
    }
    if more {
      msg.set_last(false);
    }
    Some(base)
  }

  /// Block `num` of the request body being sent
  fn request_fragment(template: &Message, token: Token, num: u32, szx: u8) -> Option<Req> {
    let (bytes, more) = slice(&template.payload, num, szx)?;
    let mut msg = template.clone();
    msg.id = None;
    msg.token = token;
    msg.payload = bytes.to_vec();
    msg.set_block1(Block { num, more, szx });
    if num == 0 {
      msg.set(known::SIZE1, encode_uint(template.payload.len() as u32));
    }
    Req::try_from_msg(msg)
  }

  fn current_token(ex: &Exchange) -> Option<Token> {
    ex.current_request().map(Req::msg_token)
  }
}

impl Layer for Blockwise {
  fn send_request(&mut self, ex: &mut Exchange, req: Req, cx: &mut Cx<'_>) -> Option<Req> {
    let szx = Self::preferred_szx(cx);
    if req.msg().block1().is_some() || req.msg().payload.len() <= block_size(szx) {
      return Some(req);
    }

    let status = BlockStatus::sending(req.msg(), szx);
    let first = Self::request_fragment(req.msg(), req.msg_token(), 0, szx);
    log::debug!("sending {} byte body to {} in {} byte blocks",
                status.body.len(),
                req.msg().peer,
                block_size(szx));
    ex.request_block_status = Some(status);
    first
  }

  fn send_response(&mut self, ex: &mut Exchange, resp: Resp, cx: &mut Cx<'_>) -> Option<Resp> {
    let mut resp = resp;

    if let Some(status) = ex.request_block_status.take() {
      if status.complete {
        resp.msg_mut().set_block1(Block { num: status.num.saturating_sub(1),
                                          more: false,
                                          szx: status.szx });
      }
    }

    let requested = ex.current_request().and_then(|r| r.msg().block2());
    let pref = Self::preferred_szx(cx);
    let szx = requested.map(|b| b.szx.min(pref)).unwrap_or(pref);
    let num = requested.map(|b| b.num).unwrap_or(0);

    if num == 0 && resp.msg().payload.len() <= block_size(szx) {
      return Some(resp);
    }

    let status = BlockStatus::sending(resp.msg(), szx);
    let notification = resp.is_notification();
    let body = status.body.clone();

    match Self::fragment(resp, &body, num, szx) {
      | Some(fragment) => {
        if fragment.has_continuation() && !notification {
          ex.response_block_status = Some(status);
        }
        Some(fragment)
      },
      | None => {
        let mut bad = match ex.current_request() {
          | Some(req) => Self::reply(req, code::BAD_REQUEST),
          | None => return None,
        };
        bad.msg_mut().set_payload("block out of range".bytes());
        Some(bad)
      },
    }
  }

  fn receive_request(&mut self, ex: &mut Exchange, req: Req, cx: &mut Cx<'_>) -> Option<Req> {
    if ex.origin() != Origin::Remote {
      return Some(req);
    }

    if let Some(block) = req.msg().block1() {
      return Self::receive_block1(ex, req, block, cx);
    }

    match (req.msg().block2(), ex.response_block_status.as_ref()) {
      | (Some(block), Some(status)) if status.is_sending() => {
        Self::serve_block2(ex, &req, block, cx);
        None
      },
      | _ => Some(req),
    }
  }

  fn receive_response(&mut self,
                      ex: &mut Exchange,
                      resp: Resp,
                      cx: &mut Cx<'_>)
                      -> Option<Resp> {
    if ex.origin() != Origin::Local {
      return Some(resp);
    }

    if let Some(mut status) = ex.request_block_status.take() {
      match (resp.msg().block1(), status.template.as_ref(), Self::current_token(ex)) {
        | (Some(block), Some(template), Some(token)) if resp.code() == code::CONTINUE => {
          // the server may ask for smaller blocks from here on
          let offset = (block.num as usize + 1) * block_size(status.szx);
          status.szx = block.szx.min(status.szx);
          let num = (offset / block_size(status.szx)) as u32;

          match Self::request_fragment(template, token, num, status.szx) {
            | Some(next) => {
              status.num = num;
              ex.request_block_status = Some(status);
              cx.send_request(next);
              return None;
            },
            | None => log::warn!("{} asked to continue a body that was fully sent",
                                 resp.msg().peer),
          }
        },
        | _ => (),
      }
    }

    let block = match resp.msg().block2() {
      | Some(block) => block,
      | None => return Some(resp),
    };

    let mut status = match ex.response_block_status.take() {
      | Some(status) if block.num > 0 => status,
      | _ => BlockStatus { template: Some(resp.msg().clone()),
                           ..BlockStatus::receiving(block.szx) },
    };

    if block.offset() != status.body.len() {
      log::warn!("expected block at offset {} from {}, got {}",
                 status.body.len(),
                 resp.msg().peer,
                 block.offset());
      return Some(resp);
    }

    status.body.extend_from_slice(&resp.msg().payload);
    if status.body.len() > cx.config().block.max_body_size {
      log::warn!("response body from {} exceeds {} bytes; giving up",
                 resp.msg().peer,
                 cx.config().block.max_body_size);
      return Some(resp);
    }

    if block.more {
      let next = ex.request().cloned().zip(Self::current_token(ex)).map(|(req, token)| {
        let mut msg = req.into_msg();
        msg.id = None;
        msg.token = token;
        msg.payload.clear();
        msg.remove(known::BLOCK1);
        msg.remove(known::OBSERVE);
        msg.set_block2(Block { num: block.num + 1,
                               more: false,
                               szx: block.szx });
        msg
      });

      if let Some(next) = next.and_then(Req::try_from_msg) {
        status.num = block.num + 1;
        ex.response_block_status = Some(status);
        cx.send_request(next);
        return None;
      }
    }

    let mut whole = resp;
    if let Some(seq) = status.template.as_ref().and_then(Message::observe) {
      whole.msg_mut().set_observe(seq);
    }
    whole.msg_mut().payload = status.body;
    Some(whole)
  }
}

#[cfg(test)]
mod test {
  use embedded_time::duration::Milliseconds;
  use toad_msg::{Id, Type};

  use super::*;
  use crate::config::Config;
  use crate::exchange::ExchangeId;
  use crate::stack::Stack;
  use crate::test::{self, Delivered, DelivererMock, OutboxMock};

  const BODY: &[u8] = b"0123456789abcdef0123456789abcdef01234567";

  fn config() -> Config {
    let mut config = Config::default();
    config.block.preferred_size = 16;
    config.block.max_body_size = 64;
    config
  }

  fn stack() -> (Stack, DelivererMock) {
    let mut stack = Stack::from_layers(vec![Box::new(Blockwise)]);
    let deliverer = DelivererMock::default();
    stack.set_deliverer(Box::new(deliverer.clone()));
    (stack, deliverer)
  }

  fn put(mid: u16, num: u32, more: bool) -> Req {
    let mut req = Req::put(test::x.x.x.x(1), "fw");
    req.msg_mut().id = Some(Id(mid));
    req.msg_mut().token = test::token(&[mid as u8]);
    req.msg_mut().payload = slice(BODY, num, 0).map(|(b, _)| b.to_vec())
                                               .unwrap_or_default();
    req.msg_mut().set_block1(Block { num, more, szx: 0 });
    req
  }

  fn receive(stack: &mut Stack, ex: &mut Exchange, req: Req, outbox: &mut OutboxMock) {
    let config = config();
    let mut cx = Cx::new(Milliseconds(0), &config, ex.id());
    ex.set_current_request(req.clone());
    stack.receive_request(ex, req, &mut cx, outbox);
  }

  #[test]
  fn server_reassembles_request_body() {
    let (mut stack, deliverer) = stack();
    let mut outbox = OutboxMock::default();
    let mut ex = Exchange::new(ExchangeId(1), Origin::Remote, Milliseconds(0));

    receive(&mut stack, &mut ex, put(1, 0, true), &mut outbox);
    receive(&mut stack, &mut ex, put(2, 1, true), &mut outbox);
    assert!(deliverer.delivered().is_empty());
    assert_eq!(outbox.responses().len(), 2);
    assert!(outbox.responses()
                  .iter()
                  .all(|r| r.code() == code::CONTINUE && !r.msg().is_last()));
    assert_eq!(outbox.responses()[1].msg().block1(),
               Some(Block { num: 1,
                            more: true,
                            szx: 0 }));

    receive(&mut stack, &mut ex, put(3, 2, false), &mut outbox);
    match deliverer.delivered().as_slice() {
      | [Delivered::Request(_, req)] => assert_eq!(req.msg().payload, BODY),
      | other => panic!("{:?}", other),
    }

    let config = config();
    let mut cx = Cx::new(Milliseconds(0), &config, ex.id());
    let mut resp = Resp::for_request(&put(3, 2, false));
    resp.set_code(code::CHANGED);
    stack.send_response(&mut ex, resp, &mut cx, &mut outbox);
    assert_eq!(outbox.responses()[2].msg().block1(),
               Some(Block { num: 2,
                            more: false,
                            szx: 0 }));
  }

  #[test]
  fn server_rejects_gaps() {
    let (mut stack, deliverer) = stack();
    let mut outbox = OutboxMock::default();
    let mut ex = Exchange::new(ExchangeId(1), Origin::Remote, Milliseconds(0));

    receive(&mut stack, &mut ex, put(1, 0, true), &mut outbox);
    receive(&mut stack, &mut ex, put(2, 2, false), &mut outbox);

    assert!(deliverer.delivered().is_empty());
    assert_eq!(outbox.responses()[1].code(), code::REQUEST_ENTITY_INCOMPLETE);
    assert!(outbox.responses()[1].msg().is_last());
  }

  #[test]
  fn server_rejects_oversized_bodies() {
    let (mut stack, _) = stack();
    let mut outbox = OutboxMock::default();
    let mut ex = Exchange::new(ExchangeId(1), Origin::Remote, Milliseconds(0));

    for num in 0..5u32 {
      let mut req = put(num as u16 + 1, num, true);
      req.msg_mut().payload = vec![0; 16];
      receive(&mut stack, &mut ex, req, &mut outbox);
    }

    let last = outbox.responses().last().copied().unwrap();
    assert_eq!(last.code(), code::REQUEST_ENTITY_TOO_LARGE);
    assert_eq!(last.msg().get_first(known::SIZE1), Some(&[64u8][..]));
  }

  #[test]
  fn server_serves_response_blocks() {
    let (mut stack, deliverer) = stack();
    let mut outbox = OutboxMock::default();
    let mut ex = Exchange::new(ExchangeId(1), Origin::Remote, Milliseconds(0));
    let config = config();

    let mut get = Req::get(test::x.x.x.x(1), "big");
    get.msg_mut().id = Some(Id(1));
    receive(&mut stack, &mut ex, get.clone(), &mut outbox);

    let mut resp = Resp::for_request(&get);
    resp.msg_mut().payload = BODY.to_vec();
    let mut cx = Cx::new(Milliseconds(0), &config, ex.id());
    stack.send_response(&mut ex, resp, &mut cx, &mut outbox);

    let first = outbox.responses()[0].clone();
    assert_eq!(first.msg().payload, &BODY[..16]);
    assert!(first.has_continuation());
    assert!(!first.msg().is_last());
    assert_eq!(first.msg().size2(), Some(BODY.len() as u32));

    for (mid, num) in [(2u16, 1u32), (3, 2)] {
      let mut next = get.clone();
      next.msg_mut().id = Some(Id(mid));
      next.msg_mut().set_block2(Block { num,
                                        more: false,
                                        szx: 0 });
      receive(&mut stack, &mut ex, next, &mut outbox);
    }

    // follow-ups are answered without bothering the application
    assert_eq!(deliverer.delivered().len(), 1);
    let responses = outbox.responses();
    assert_eq!(responses[1].msg().payload, &BODY[16..32]);
    assert_eq!(responses[1].msg_id(), Some(Id(2)));
    assert_eq!(responses[2].msg().payload, &BODY[32..]);
    assert!(!responses[2].has_continuation());
    assert!(responses[2].msg().is_last());
  }

  #[test]
  fn client_sends_request_body_in_blocks() {
    let (mut stack, deliverer) = stack();
    let mut outbox = OutboxMock::default();
    let mut ex = Exchange::new(ExchangeId(1), Origin::Local, Milliseconds(0));
    let config = config();

    let mut req = Req::put(test::x.x.x.x(1), "fw");
    req.msg_mut().token = test::token(&[4]);
    req.msg_mut().payload = BODY.to_vec();
    let mut cx = Cx::new(Milliseconds(0), &config, ex.id());
    stack.send_request(&mut ex, req, &mut cx, &mut outbox);

    for num in 0..2 {
      let sent = outbox.requests().last().copied().cloned().unwrap();
      assert_eq!(sent.msg().block1().map(|b| b.num), Some(num));

      let mut cont = Resp::for_request(&sent);
      cont.set_code(code::CONTINUE);
      cont.msg_mut().set_block1(sent.msg().block1().unwrap());
      let mut cx = Cx::new(Milliseconds(0), &config, ex.id());
      stack.receive_response(&mut ex, cont, &mut cx, &mut outbox);
    }

    let requests = outbox.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.msg().token == test::token(&[4])));
    assert_eq!(requests[2].msg().payload, &BODY[32..]);
    assert_eq!(requests[2].msg().block1().map(|b| b.more), Some(false));
    assert!(deliverer.delivered().is_empty());

    let mut done = Resp::for_request(requests[2]);
    done.set_code(code::CHANGED);
    let mut cx = Cx::new(Milliseconds(0), &config, ex.id());
    stack.receive_response(&mut ex, done, &mut cx, &mut outbox);
    assert_eq!(deliverer.delivered().len(), 1);
  }

  #[test]
  fn client_fetches_response_blocks() {
    let (mut stack, deliverer) = stack();
    let mut outbox = OutboxMock::default();
    let mut ex = Exchange::new(ExchangeId(1), Origin::Local, Milliseconds(0));
    let config = config();

    let mut get = Req::get(test::x.x.x.x(1), "big");
    get.msg_mut().token = test::token(&[4]);
    let mut cx = Cx::new(Milliseconds(0), &config, ex.id());
    stack.send_request(&mut ex, get, &mut cx, &mut outbox);

    for num in 0..3 {
      let sent = outbox.requests().last().copied().cloned().unwrap();
      let mut resp = Resp::for_request(&sent);
      let (bytes, more) = slice(BODY, num, 0).unwrap();
      resp.msg_mut().payload = bytes.to_vec();
      resp.msg_mut().set_block2(Block { num, more, szx: 0 });
      let mut cx = Cx::new(Milliseconds(0), &config, ex.id());
      stack.receive_response(&mut ex, resp, &mut cx, &mut outbox);
    }

    let requests = outbox.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].msg().block2().map(|b| b.num), Some(2));
    assert_eq!(requests[2].msg().ty, Type::Con);

    match deliverer.delivered().as_slice() {
      | [Delivered::Response(_, resp)] => assert_eq!(resp.msg().payload, BODY),
      | other => panic!("{:?}", other),
    }
  }
}
