use crate::msg::Message;
use crate::resp::code::to_human;

/// One-line summary of a message for log lines
pub(crate) fn msg_summary(msg: &Message) -> String {
  format!("{:?}: {:?} {} (id {}) with {} byte payload",
          msg.kind(),
          msg.ty,
          to_human(msg.code),
          msg.id.map(|id| id.0.to_string()).unwrap_or_else(|| "-".into()),
          msg.payload.len())
}

#[cfg(test)]
mod test {
  use toad_msg::{Id, Type};

  use super::*;
  use crate::req::Req;
  use crate::test;

  #[test]
  fn summary() {
    let mut req = Req::get(test::x.x.x.x(1), "a");
    assert_eq!(msg_summary(req.msg()),
               "Request: Con 0.01 (id -) with 0 byte payload");

    req.msg_mut().id = Some(Id(12));
    req.msg_mut().ty = Type::Non;
    req.msg_mut().set_payload("hi".bytes());
    assert_eq!(msg_summary(req.msg()),
               "Request: Non 0.01 (id 12) with 2 byte payload");
  }
}
