pub use toad_msg::Code;

macro_rules! code {
  ($(#[$meta:meta])* $name:ident = $c:literal . $d:literal) => {
    $(#[$meta])*
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: Code = Code::new($c, $d);
  };
}

// 2.xx
code!(
  /// 2.01 Created
  CREATED = 2 . 01
);
code!(
  /// 2.02 Deleted
  DELETED = 2 . 02
);
code!(
  /// 2.03 Valid
  VALID = 2 . 03
);
code!(
  /// 2.04 Changed
  CHANGED = 2 . 04
);
code!(
  /// 2.05 Content
  CONTENT = 2 . 05
);
code!(
  /// ## [2.31 Continue](https://www.rfc-editor.org/rfc/rfc7959#section-2.9.1)
  /// This success status code indicates that the transfer of this
  /// block of the request body was successful and that the server
  /// encourages sending further blocks, but that a final outcome of the
  /// whole block-wise request cannot yet be determined.  No payload is
  /// returned with this response code.
  CONTINUE = 2 . 31
);

// 4.xx
code!(
  /// 4.00 Bad Request
  BAD_REQUEST = 4 . 00
);
code!(
  /// 4.04 Not Found
  NOT_FOUND = 4 . 04
);
code!(
  /// 4.05 Method Not Allowed
  METHOD_NOT_ALLOWED = 4 . 05
);
code!(
  /// ## [4.08 Request Entity Incomplete](https://www.rfc-editor.org/rfc/rfc7959#section-2.9.2)
  /// This client error status code indicates that the server has not
  /// received the blocks of the request body that it needs to proceed.
  REQUEST_ENTITY_INCOMPLETE = 4 . 08
);
code!(
  /// 4.13 Request Entity Too Large
  REQUEST_ENTITY_TOO_LARGE = 4 . 13
);

// 5.xx
code!(
  /// 5.00 Internal Server Error
  INTERNAL_SERVER_ERROR = 5 . 00
);
code!(
  /// 5.03 Service Unavailable
  SERVICE_UNAVAILABLE = 5 . 03
);

/// Is this a 2.xx code?
pub fn is_success(code: Code) -> bool {
  code.class == 2
}

/// Render a code as `c.dd`, e.g. `2.05`
pub fn to_human(code: Code) -> String {
  format!("{}.{:02}", code.class, code.detail)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn human() {
    assert_eq!(to_human(CONTENT), "2.05");
    assert_eq!(to_human(CONTINUE), "2.31");
    assert_eq!(to_human(REQUEST_ENTITY_INCOMPLETE), "4.08");
  }

  #[test]
  fn success() {
    assert!(is_success(CHANGED));
    assert!(!is_success(NOT_FOUND));
  }
}
