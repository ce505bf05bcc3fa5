use toad_msg::Code;

/// Request method
#[derive(Clone, Copy, PartialEq)]
pub struct Method(pub(crate) Code);

impl Method {
  /// The raw code of this method
  pub fn code(&self) -> Code {
    self.0
  }
}

impl core::fmt::Debug for Method {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match (self.0.class, self.0.detail) {
      | (0, 0) => write!(f, "EMPTY"),
      | (0, 1) => write!(f, "GET"),
      | (0, 2) => write!(f, "POST"),
      | (0, 3) => write!(f, "PUT"),
      | (0, 4) => write!(f, "DELETE"),
      | (c, d) => write!(f, "Method({}.{:02})", c, d),
    }
  }
}

/// EMPTY
pub const EMPTY: Method = Method(Code::new(0, 0));
/// GET
pub const GET: Method = Method(Code::new(0, 1));
/// POST
pub const POST: Method = Method(Code::new(0, 2));
/// PUT
pub const PUT: Method = Method(Code::new(0, 3));
/// DELETE
pub const DELETE: Method = Method(Code::new(0, 4));
