use std::fmt::Debug;
use std::net::SocketAddr;

use toad_msg::{Id, OptNumber, OptValue, Payload, TryFromBytes, TryIntoBytes, Type};

use crate::error::Error;
use crate::msg::{Kind, Message};

/// Outcome of parsing a datagram
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
  /// A well-formed request
  Request(Message),
  /// A well-formed response
  Response(Message),
  /// A well-formed empty message (ACK, RST or ping)
  Empty(Message),
  /// Looked like CoAP but could not be parsed; the message id was recovered
  Malformed {
    /// Recovered message id
    id: Id,
    /// Was the datagram shaped like a CON or NON request?
    request_shaped: bool,
  },
  /// Not recognizably CoAP
  Unrecognized,
}

/// Converts between datagrams and [`Message`]s
pub trait Codec: Send + Debug {
  /// Parse a datagram received from `peer`
  fn parse(&self, bytes: &[u8], peer: SocketAddr) -> Parsed;

  /// Serialize a message; its id must have been provisioned
  fn serialize(&self, msg: &Message) -> Result<Vec<u8>, Error>;
}

/// [`Codec`] backed by [`toad_msg`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgCodec;

impl MsgCodec {
  /// Recover what we can from the 4-byte CoAP header of a
  /// datagram that failed to parse
  fn salvage(bytes: &[u8]) -> Parsed {
    match bytes {
      | [b0, code, id_hi, id_lo, ..] if b0 >> 6 == 1 => {
        let ty = (b0 >> 4) & 0b11;
        let (class, detail) = (code >> 5, code & 0b11111);
        let request_shaped = ty <= 1 && class == 0 && detail != 0;

        Parsed::Malformed { id: Id(u16::from_be_bytes([*id_hi, *id_lo])),
                            request_shaped }
      },
      | _ => Parsed::Unrecognized,
    }
  }
}

impl Codec for MsgCodec {
  fn parse(&self, bytes: &[u8], peer: SocketAddr) -> Parsed {
    let decoded = match toad_msg::alloc::Message::try_from_bytes(bytes) {
      | Ok(m) => m,
      | Err(e) => {
        log::debug!("failed to parse {} byte datagram from {}: {:?}",
                    bytes.len(),
                    peer,
                    e);
        return Self::salvage(bytes);
      },
    };

    let mut msg = Message::new(decoded.ty, decoded.code, peer);
    msg.id = Some(decoded.id);
    msg.token = decoded.token;
    msg.payload = decoded.payload.0;
    msg.opts = decoded.opts
                      .into_iter()
                      .map(|(OptNumber(n), vals)| {
                        (n, vals.into_iter().map(|OptValue(v)| v).collect())
                      })
                      .collect();

    match msg.kind() {
      | Kind::Request => Parsed::Request(msg),
      | Kind::Response => Parsed::Response(msg),
      // empty messages must not carry a token, options or payload
      | Kind::Empty if msg.token_bytes().is_empty() && msg.opts.is_empty() && msg.payload.is_empty() => {
        Parsed::Empty(msg)
      },
      | Kind::Empty | Kind::Reserved => Parsed::Malformed { id: decoded.id,
                                                            request_shaped: false },
    }
  }

  fn serialize(&self, msg: &Message) -> Result<Vec<u8>, Error> {
    let id = msg.id
                .ok_or_else(|| Error::Serialize("message id was never provisioned".into()))?;

    let wire = toad_msg::alloc::Message { id,
                                          ty: msg.ty,
                                          ver: Default::default(),
                                          token: msg.token,
                                          code: msg.code,
                                          opts: msg.opts
                                                   .iter()
                                                   .map(|(n, vals)| {
                                                     (OptNumber(*n),
                                                      vals.iter()
                                                          .cloned()
                                                          .map(OptValue)
                                                          .collect())
                                                   })
                                                   .collect(),
                                          payload: Payload(msg.payload.clone()) };

    wire.try_into_bytes::<Vec<u8>>()
        .map_err(|e| Error::Serialize(format!("{:?}", e)))
  }
}

/// Is this a CON or NON message?
pub(crate) fn expects_reply(ty: Type) -> bool {
  matches!(ty, Type::Con | Type::Non)
}
