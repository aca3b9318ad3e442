//! Composite key encoding
//!
//! Every key is an [`Entity`] followed by zero or more typed segments. The
//! encoding is order-preserving: comparing two encoded keys byte by byte
//! gives the same answer as comparing the logical tuples, so a prefix scan
//! is a `WHERE` on the leading segments and scan direction is `ORDER BY`.
//!
//! ## Segment formats
//! ```text
//! unsigned  [n: u8][n big-endian bytes]          n = significant bytes, 0..=8
//! signed    [0x80 + n][n BE bytes]               v >= 0
//!           [0x7f - n][!(n BE bytes of !v)]      v <  0
//! bool      [0 | 1]
//! string    [utf-8 bytes][0x00]
//! bytes     [raw bytes]                          last segment only
//! ```
//!
//! Shorter unsigned integers carry a smaller length byte, so they sort
//! first; among equal lengths the big-endian payload decides. The signed
//! form mirrors this around `0x80` so every negative value sorts before
//! every non-negative one.

use std::fmt;
use std::ops::Deref;

use crate::error::{Result, TabulaError};

/// Namespace identifier of a table or index; first segment of every key
pub type Entity = u32;

/// Reserved namespace holding per-entity sequence counters
pub const SEQUENCES_ENTITY: Entity = 0x7fff_ffff;

const STRING_TERMINATOR: u8 = 0x00;
const SIGNED_ZERO_TAG: u8 = 0x80;

// =============================================================================
// Segment traits
// =============================================================================

/// A value that can be appended to a key as one segment
pub trait KeyPart {
    fn encode_key_part(&self, buf: &mut Vec<u8>);

    /// Check that the segment can be encoded unambiguously
    fn validate_key_part(&self) -> Result<()> {
        Ok(())
    }
}

/// A value that can be read back from a key segment
pub trait FromKeyPart: Sized {
    fn decode_key_part(reader: &mut KeyReader<'_>) -> Result<Self>;
}

impl<T: KeyPart + ?Sized> KeyPart for &T {
    fn encode_key_part(&self, buf: &mut Vec<u8>) {
        (**self).encode_key_part(buf)
    }

    fn validate_key_part(&self) -> Result<()> {
        (**self).validate_key_part()
    }
}

macro_rules! unsigned_key_part {
    ($($ty:ty),*) => {$(
        impl KeyPart for $ty {
            fn encode_key_part(&self, buf: &mut Vec<u8>) {
                encode_uint(buf, *self as u64);
            }
        }

        impl FromKeyPart for $ty {
            fn decode_key_part(reader: &mut KeyReader<'_>) -> Result<Self> {
                let v = reader.read_uint()?;
                <$ty>::try_from(v).map_err(|_| {
                    TabulaError::Decode(format!(
                        "{} out of range for {}",
                        v,
                        stringify!($ty)
                    ))
                })
            }
        }
    )*};
}

macro_rules! signed_key_part {
    ($($ty:ty),*) => {$(
        impl KeyPart for $ty {
            fn encode_key_part(&self, buf: &mut Vec<u8>) {
                encode_int(buf, *self as i64);
            }
        }

        impl FromKeyPart for $ty {
            fn decode_key_part(reader: &mut KeyReader<'_>) -> Result<Self> {
                let v = reader.read_int()?;
                <$ty>::try_from(v).map_err(|_| {
                    TabulaError::Decode(format!(
                        "{} out of range for {}",
                        v,
                        stringify!($ty)
                    ))
                })
            }
        }
    )*};
}

unsigned_key_part!(u8, u16, u32, u64, usize);
signed_key_part!(i8, i16, i32, i64, isize);

impl KeyPart for bool {
    fn encode_key_part(&self, buf: &mut Vec<u8>) {
        buf.push(u8::from(*self));
    }
}

impl FromKeyPart for bool {
    fn decode_key_part(reader: &mut KeyReader<'_>) -> Result<Self> {
        reader.read_bool()
    }
}

/// Strings must not contain NUL: it is the segment terminator
///
/// Encoding one that does panics; use [`Key::try_push`] for untrusted text.
impl KeyPart for str {
    fn encode_key_part(&self, buf: &mut Vec<u8>) {
        assert!(
            !self.as_bytes().contains(&STRING_TERMINATOR),
            "key strings cannot contain NUL"
        );
        buf.extend_from_slice(self.as_bytes());
        buf.push(STRING_TERMINATOR);
    }

    fn validate_key_part(&self) -> Result<()> {
        if self.as_bytes().contains(&STRING_TERMINATOR) {
            return Err(TabulaError::InvalidKeyFormat);
        }
        Ok(())
    }
}

impl KeyPart for String {
    fn encode_key_part(&self, buf: &mut Vec<u8>) {
        self.as_str().encode_key_part(buf)
    }

    fn validate_key_part(&self) -> Result<()> {
        self.as_str().validate_key_part()
    }
}

impl FromKeyPart for String {
    fn decode_key_part(reader: &mut KeyReader<'_>) -> Result<Self> {
        reader.read_str().map(str::to_owned)
    }
}

/// Raw bytes are written verbatim and only make sense as the last segment
impl KeyPart for [u8] {
    fn encode_key_part(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl KeyPart for Vec<u8> {
    fn encode_key_part(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl FromKeyPart for Vec<u8> {
    fn decode_key_part(reader: &mut KeyReader<'_>) -> Result<Self> {
        Ok(reader.read_rest().to_vec())
    }
}

impl FromKeyPart for () {
    fn decode_key_part(_reader: &mut KeyReader<'_>) -> Result<Self> {
        Ok(())
    }
}

macro_rules! tuple_key_part {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: KeyPart),+> KeyPart for ($($name,)+) {
            fn encode_key_part(&self, buf: &mut Vec<u8>) {
                $(self.$idx.encode_key_part(buf);)+
            }

            fn validate_key_part(&self) -> Result<()> {
                $(self.$idx.validate_key_part()?;)+
                Ok(())
            }
        }

        impl<$($name: FromKeyPart),+> FromKeyPart for ($($name,)+) {
            fn decode_key_part(reader: &mut KeyReader<'_>) -> Result<Self> {
                Ok(($($name::decode_key_part(reader)?,)+))
            }
        }
    };
}

tuple_key_part!(A 0);
tuple_key_part!(A 0, B 1);
tuple_key_part!(A 0, B 1, C 2);
tuple_key_part!(A 0, B 1, C 2, D 3);
tuple_key_part!(A 0, B 1, C 2, D 3, E 4);
tuple_key_part!(A 0, B 1, C 2, D 3, E 4, F 5);

// =============================================================================
// Key builder
// =============================================================================

/// An encoded key under construction
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key {
    bytes: Vec<u8>,
}

impl Key {
    /// Start a key in `entity`'s namespace
    pub fn new(entity: Entity) -> Self {
        let mut bytes = Vec::with_capacity(16);
        encode_uint(&mut bytes, u64::from(entity));
        Self { bytes }
    }

    /// Append one segment
    ///
    /// # Panics
    /// If a string segment contains NUL.
    pub fn push<P: KeyPart + ?Sized>(&mut self, part: &P) -> &mut Self {
        part.encode_key_part(&mut self.bytes);
        self
    }

    /// Append one segment, builder style
    ///
    /// # Panics
    /// If a string segment contains NUL.
    pub fn with<P: KeyPart + ?Sized>(mut self, part: &P) -> Self {
        part.encode_key_part(&mut self.bytes);
        self
    }

    /// Append one segment, rejecting it with [`TabulaError::InvalidKeyFormat`]
    /// instead of panicking; the key is unchanged on error
    pub fn try_push<P: KeyPart + ?Sized>(&mut self, part: &P) -> Result<&mut Self> {
        part.validate_key_part()?;
        part.encode_key_part(&mut self.bytes);
        Ok(self)
    }

    pub fn try_with<P: KeyPart + ?Sized>(mut self, part: &P) -> Result<Self> {
        self.try_push(part)?;
        Ok(self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Deref for Key {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Key> for Vec<u8> {
    fn from(key: Key) -> Self {
        key.bytes
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", Hex(&self.bytes))
    }
}

/// Build an encoded [`Key`] from an entity and any number of segments
///
/// Panics if a string segment contains NUL, like [`Key::push`].
///
/// ```
/// use tabula::key;
///
/// const USERS: tabula::Entity = 1;
/// let k = key!(USERS, "alice", 42u64);
/// assert!(k.as_bytes().starts_with(key!(USERS, "alice").as_bytes()));
/// ```
#[macro_export]
macro_rules! key {
    ($entity:expr $(, $part:expr)* $(,)?) => {{
        #[allow(unused_mut)]
        let mut key = $crate::Key::new($entity);
        $( key.push(&$part); )*
        key
    }};
}

/// Encode a key from an entity and a tuple (or single segment)
pub fn encode_key<P: KeyPart + ?Sized>(entity: Entity, parts: &P) -> Vec<u8> {
    Key::new(entity).with(parts).into_vec()
}

/// Decode the entity and the segments of `key`
///
/// Trailing bytes after the requested segments are ignored, so a caller
/// may decode just a leading part of a key.
pub fn decode_key<T: FromKeyPart>(key: &[u8]) -> Result<(Entity, T)> {
    let mut reader = KeyReader::new(key);
    let entity = reader.read_entity()?;
    let parts = T::decode_key_part(&mut reader)?;
    Ok((entity, parts))
}

/// Entity of an encoded key
pub fn entity_of(key: &[u8]) -> Result<Entity> {
    KeyReader::new(key).read_entity()
}

// =============================================================================
// Reader
// =============================================================================

/// Sequential reader over the segments of an encoded key
pub struct KeyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> KeyReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_entity(&mut self) -> Result<Entity> {
        let v = self.read_uint()?;
        Entity::try_from(v).map_err(|_| TabulaError::Decode(format!("entity {} out of range", v)))
    }

    pub fn read_uint(&mut self) -> Result<u64> {
        let n = self.read_byte()? as usize;
        if n > 8 {
            return Err(TabulaError::Decode(format!(
                "unsigned segment claims {} bytes",
                n
            )));
        }
        Ok(be_to_u64(self.take(n)?))
    }

    pub fn read_int(&mut self) -> Result<i64> {
        let tag = self.read_byte()?;
        if tag >= SIGNED_ZERO_TAG {
            let n = (tag - SIGNED_ZERO_TAG) as usize;
            if n > 8 {
                return Err(TabulaError::Decode(format!("bad signed tag 0x{:02x}", tag)));
            }
            let v = be_to_u64(self.take(n)?);
            i64::try_from(v).map_err(|_| TabulaError::Decode(format!("{} overflows i64", v)))
        } else {
            let n = (SIGNED_ZERO_TAG - 1 - tag) as usize;
            if n > 8 {
                return Err(TabulaError::Decode(format!("bad signed tag 0x{:02x}", tag)));
            }
            let mut m = 0u64;
            for &b in self.take(n)? {
                m = (m << 8) | u64::from(!b);
            }
            let m = i64::try_from(m)
                .map_err(|_| TabulaError::Decode(format!("{} overflows i64", m)))?;
            Ok(!m)
        }
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(TabulaError::Decode(format!("bad bool byte 0x{:02x}", b))),
        }
    }

    /// Read up to the next NUL and consume it
    pub fn read_str(&mut self) -> Result<&'a str> {
        let rest = self.remaining();
        let n = rest
            .iter()
            .position(|&b| b == STRING_TERMINATOR)
            .ok_or(TabulaError::InvalidKeyFormat)?;
        let s = std::str::from_utf8(&rest[..n])
            .map_err(|e| TabulaError::Decode(format!("key string is not utf-8: {}", e)))?;
        self.pos += n + 1;
        Ok(s)
    }

    /// Consume everything left
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.remaining();
        self.pos = self.data.len();
        rest
    }

    fn read_byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(TabulaError::Decode(format!(
                "key truncated: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.data.len() - self.pos
            )));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

// =============================================================================
// Integer encodings
// =============================================================================

/// Append an order-preserving unsigned integer
pub fn encode_uint(buf: &mut Vec<u8>, v: u64) {
    let n = significant_bytes(v);
    buf.push(n as u8);
    buf.extend_from_slice(&v.to_be_bytes()[8 - n..]);
}

/// Append an order-preserving signed integer
pub fn encode_int(buf: &mut Vec<u8>, v: i64) {
    if v >= 0 {
        let u = v as u64;
        let n = significant_bytes(u);
        buf.push(SIGNED_ZERO_TAG + n as u8);
        buf.extend_from_slice(&u.to_be_bytes()[8 - n..]);
    } else {
        let m = !v as u64;
        let n = significant_bytes(m);
        buf.push(SIGNED_ZERO_TAG - 1 - n as u8);
        buf.extend(m.to_be_bytes()[8 - n..].iter().map(|b| !b));
    }
}

fn significant_bytes(v: u64) -> usize {
    (64 - v.leading_zeros() as usize + 7) / 8
}

fn be_to_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Lower-case hex rendering for keys and values in messages
pub struct Hex<'a>(pub &'a [u8]);

/// Parse a hex string (optional `0x` prefix) back into bytes
pub fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.len() % 2 != 0 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(TabulaError::Decode(format!("invalid hex: {:?}", s)));
    }
    Ok(digits
        .as_bytes()
        .chunks(2)
        .map(|pair| (hex_digit(pair[0]) << 4) | hex_digit(pair[1]))
        .collect())
}

fn hex_digit(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
