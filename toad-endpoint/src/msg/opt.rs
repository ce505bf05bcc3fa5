use super::Message;

/// Option numbers of the options this crate interprets
pub mod known {
  /// Uri-Host
  pub const URI_HOST: u32 = 3;
  /// Observe ([RFC 7641](https://datatracker.ietf.org/doc/html/rfc7641))
  pub const OBSERVE: u32 = 6;
  /// Uri-Port
  pub const URI_PORT: u32 = 7;
  /// Uri-Path
  pub const URI_PATH: u32 = 11;
  /// Content-Format
  pub const CONTENT_FORMAT: u32 = 12;
  /// Uri-Query
  pub const URI_QUERY: u32 = 15;
  /// Block2 ([RFC 7959](https://datatracker.ietf.org/doc/html/rfc7959))
  pub const BLOCK2: u32 = 23;
  /// Block1 ([RFC 7959](https://datatracker.ietf.org/doc/html/rfc7959))
  pub const BLOCK1: u32 = 27;
  /// Size2
  pub const SIZE2: u32 = 28;
  /// Size1
  pub const SIZE1: u32 = 60;
}

/// Value of the Observe option in a registration request
pub const OBSERVE_REGISTER: u32 = 0;
/// Value of the Observe option in a deregistration request
pub const OBSERVE_DEREGISTER: u32 = 1;

/// Encode an unsigned integer option value
/// in the minimum number of big-endian bytes
///
/// ```
/// use toad_endpoint::msg::opt::{decode_uint, encode_uint};
///
/// assert_eq!(encode_uint(0), Vec::<u8>::new());
/// assert_eq!(encode_uint(0x0102), vec![1, 2]);
/// assert_eq!(decode_uint(&[1, 2]), 0x0102);
/// ```
pub fn encode_uint(n: u32) -> Vec<u8> {
  n.to_be_bytes()
   .into_iter()
   .skip_while(|b| *b == 0)
   .collect()
}

/// Decode an unsigned integer option value.
///
/// Values longer than 4 bytes keep their 4 least significant bytes.
pub fn decode_uint(bytes: &[u8]) -> u32 {
  bytes.iter().fold(0u32, |n, b| (n << 8) | *b as u32)
}

/// The value of a Block1 or Block2 option
///
/// ```
/// use toad_endpoint::msg::Block;
///
/// let block = Block::new(3, true, 512);
/// assert_eq!(block.size(), 512);
/// assert_eq!(block.offset(), 1536);
/// assert_eq!(Block::from_value(block.value()), block);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
  /// Block number
  pub num: u32,
  /// Do more blocks follow this one?
  pub more: bool,
  /// Size exponent; block size is `2^(szx + 4)`
  pub szx: u8,
}

impl Block {
  /// Create a block value for a block size (rounded down
  /// to a power of two between 16 and 1024)
  pub fn new(num: u32, more: bool, size: u16) -> Self {
    Self { num,
           more,
           szx: Self::szx_for(size) }
  }

  /// Size exponent for a block size
  pub fn szx_for(size: u16) -> u8 {
    let size = size.clamp(16, 1024);
    (15 - size.leading_zeros() as u8).saturating_sub(4)
  }

  /// Decode from the option's integer value
  pub fn from_value(n: u32) -> Self {
    Self { num: n >> 4,
           more: n & 0b1000 != 0,
           szx: (n & 0b111) as u8 }
  }

  /// Encode to the option's integer value
  pub fn value(&self) -> u32 {
    (self.num << 4) | ((self.more as u32) << 3) | (self.szx.min(6) as u32)
  }

  /// Size of the block in bytes
  pub fn size(&self) -> usize {
    1 << (self.szx.min(6) + 4)
  }

  /// Offset of the block's first byte in the body
  pub fn offset(&self) -> usize {
    self.num as usize * self.size()
  }
}

impl Message {
  fn get_uint(&self, number: u32) -> Option<u32> {
    self.get_first(number).map(decode_uint)
  }

  fn get_strs(&self, number: u32) -> Vec<String> {
    self.get(number)
        .map(|vals| {
          vals.iter()
              .map(|v| String::from_utf8_lossy(v).into_owned())
              .collect()
        })
        .unwrap_or_default()
  }

  /// Uri-Path segments joined by `/`
  pub fn path(&self) -> String {
    self.get_strs(known::URI_PATH).join("/")
  }

  /// Replace Uri-Path with the segments of `path`
  /// (leading & trailing slashes ignored)
  pub fn set_path(&mut self, path: impl AsRef<str>) {
    self.remove(known::URI_PATH);
    path.as_ref()
        .split('/')
        .filter(|seg| !seg.is_empty())
        .for_each(|seg| self.add(known::URI_PATH, seg.bytes()));
  }

  /// Uri-Query parameters joined by `&`
  pub fn query(&self) -> String {
    self.get_strs(known::URI_QUERY).join("&")
  }

  /// Add a Uri-Query parameter
  pub fn add_query(&mut self, param: impl AsRef<str>) {
    self.add(known::URI_QUERY, param.as_ref().bytes());
  }

  /// Identifies the resource a request targets, independent of
  /// message id & token; path plus query.
  pub fn resource(&self) -> String {
    let query = self.query();
    if query.is_empty() {
      self.path()
    } else {
      format!("{}?{}", self.path(), query)
    }
  }

  /// Value of the Observe option
  pub fn observe(&self) -> Option<u32> {
    self.get_uint(known::OBSERVE)
  }

  /// Set the Observe option (24 bits)
  pub fn set_observe(&mut self, n: u32) {
    self.set(known::OBSERVE, encode_uint(n & 0xFF_FFFF));
  }

  /// Value of the Block1 option
  pub fn block1(&self) -> Option<Block> {
    self.get_uint(known::BLOCK1).map(Block::from_value)
  }

  /// Set the Block1 option
  pub fn set_block1(&mut self, block: Block) {
    self.set(known::BLOCK1, encode_uint(block.value()));
  }

  /// Value of the Block2 option
  pub fn block2(&self) -> Option<Block> {
    self.get_uint(known::BLOCK2).map(Block::from_value)
  }

  /// Set the Block2 option
  pub fn set_block2(&mut self, block: Block) {
    self.set(known::BLOCK2, encode_uint(block.value()));
  }

  /// Value of the Size1 option
  pub fn size1(&self) -> Option<u32> {
    self.get_uint(known::SIZE1)
  }

  /// Value of the Size2 option
  pub fn size2(&self) -> Option<u32> {
    self.get_uint(known::SIZE2)
  }

  /// Set the Size2 option
  pub fn set_size2(&mut self, n: u32) {
    self.set(known::SIZE2, encode_uint(n));
  }

  /// Value of the Content-Format option
  pub fn content_format(&self) -> Option<u32> {
    self.get_uint(known::CONTENT_FORMAT)
  }

  /// Set the Content-Format option
  pub fn set_content_format(&mut self, n: u32) {
    self.set(known::CONTENT_FORMAT, encode_uint(n));
  }
}
