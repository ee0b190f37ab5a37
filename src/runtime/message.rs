//! Fixed-capacity message buffer with independent read and write cursors.
//!
//! A `Message` is the unit of data crossing the socket boundary: the read
//! loop fills one per frame, and protocols build replies into one.
//!
//! ## Wire Encoding
//!
//! All multi-byte integers are little-endian. Strings are a u16 little-endian
//! byte length followed by that many UTF-8 bytes:
//!
//! ```text
//! add_string("hi") -> 02 00 68 69
//! ```

use crate::error::MessageError;
use bytes::{Buf, BufMut};

/// Maximum body size of a single frame, shared by both ends of a connection.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Size of the length prefix that precedes every frame body on the wire.
pub const FRAME_HEADER_SIZE: usize = 2;

/// Binary message buffer.
///
/// Invariant: `read_pos <= length <= capacity`. Accessors that would break
/// it fail with a [`MessageError`] and leave both cursors untouched.
pub struct Message {
    buffer: Box<[u8]>,
    length: usize,
    read_pos: usize,
}

impl Message {
    /// Create a message with the default frame capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_MESSAGE_SIZE)
    }

    /// Create a message with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            length: 0,
            read_pos: 0,
        }
    }

    /// Total bytes this message can hold.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes written (or received) so far.
    pub fn message_length(&self) -> usize {
        self.length
    }

    /// Record how many bytes a raw socket read placed in the buffer.
    ///
    /// Rewinds the read cursor. Lengths beyond capacity are clamped.
    pub fn set_message_length(&mut self, length: usize) {
        self.length = length.min(self.capacity());
        self.read_pos = 0;
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Move the read cursor to an absolute position inside the written region.
    pub fn set_read_pos(&mut self, pos: usize) -> Result<(), MessageError> {
        if pos > self.length {
            return Err(MessageError::OutOfRange {
                pos,
                length: self.length,
            });
        }
        self.read_pos = pos;
        Ok(())
    }

    /// Unread bytes between the read cursor and the end of the written region.
    pub fn remaining(&self) -> usize {
        self.length - self.read_pos
    }

    /// Clear both cursors for reuse.
    pub fn reset(&mut self) {
        self.length = 0;
        self.read_pos = 0;
    }

    /// Drop written bytes past `length`. Longer lengths are ignored.
    pub(crate) fn truncate(&mut self, length: usize) {
        if length < self.length {
            self.length = length;
            self.read_pos = self.read_pos.min(length);
        }
    }

    /// Whole backing buffer, for raw socket reads.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Written region of the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    /// Check whether `size` more bytes fit.
    pub fn can_add(&self, size: usize) -> bool {
        size <= self.capacity() - self.length
    }

    fn take(&mut self, needed: usize) -> Result<&[u8], MessageError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(MessageError::Underflow { needed, remaining });
        }
        let start = self.read_pos;
        self.read_pos += needed;
        Ok(&self.buffer[start..start + needed])
    }

    fn reserve(&mut self, needed: usize) -> Result<&mut [u8], MessageError> {
        if !self.can_add(needed) {
            return Err(MessageError::Overflow {
                needed,
                available: self.capacity() - self.length,
            });
        }
        let start = self.length;
        self.length += needed;
        Ok(&mut self.buffer[start..start + needed])
    }

    pub fn get_byte(&mut self) -> Result<u8, MessageError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, MessageError> {
        Ok(self.take(2)?.get_u16_le())
    }

    pub fn get_u32(&mut self) -> Result<u32, MessageError> {
        Ok(self.take(4)?.get_u32_le())
    }

    pub fn get_u64(&mut self) -> Result<u64, MessageError> {
        Ok(self.take(8)?.get_u64_le())
    }

    /// Decode the next u32 without advancing the read cursor.
    pub fn peek_u32(&self) -> Result<u32, MessageError> {
        let remaining = self.remaining();
        if remaining < 4 {
            return Err(MessageError::Underflow {
                needed: 4,
                remaining,
            });
        }
        Ok((&self.buffer[self.read_pos..self.read_pos + 4]).get_u32_le())
    }

    /// Decode a length-prefixed string.
    pub fn get_string(&mut self) -> Result<String, MessageError> {
        let remaining = self.remaining();
        if remaining < 2 {
            return Err(MessageError::Underflow {
                needed: 2,
                remaining,
            });
        }
        let start = self.read_pos;
        let len = (&self.buffer[start..start + 2]).get_u16_le() as usize;
        if 2 + len > remaining {
            return Err(MessageError::Underflow {
                needed: 2 + len,
                remaining,
            });
        }
        let value = std::str::from_utf8(&self.buffer[start + 2..start + 2 + len])
            .map_err(|_| MessageError::InvalidUtf8)?
            .to_owned();
        self.read_pos += 2 + len;
        Ok(value)
    }

    /// All unread bytes. Does not consume them.
    pub fn get_raw(&self) -> &[u8] {
        &self.buffer[self.read_pos..self.length]
    }

    /// Byte at an absolute position inside the written region.
    pub fn get_at(&self, pos: usize) -> Result<u8, MessageError> {
        if pos >= self.length {
            return Err(MessageError::OutOfRange {
                pos,
                length: self.length,
            });
        }
        Ok(self.buffer[pos])
    }

    /// Skip `count` unread bytes.
    pub fn skip_bytes(&mut self, count: usize) -> Result<&mut Self, MessageError> {
        self.take(count)?;
        Ok(self)
    }

    pub fn add_byte(&mut self, value: u8) -> Result<&mut Self, MessageError> {
        self.reserve(1)?[0] = value;
        Ok(self)
    }

    pub fn add_u16(&mut self, value: u16) -> Result<&mut Self, MessageError> {
        self.reserve(2)?.put_u16_le(value);
        Ok(self)
    }

    pub fn add_u32(&mut self, value: u32) -> Result<&mut Self, MessageError> {
        self.reserve(4)?.put_u32_le(value);
        Ok(self)
    }

    pub fn add_u64(&mut self, value: u64) -> Result<&mut Self, MessageError> {
        self.reserve(8)?.put_u64_le(value);
        Ok(self)
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, MessageError> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(self)
    }

    /// Append a length-prefixed string.
    pub fn add_string(&mut self, value: &str) -> Result<&mut Self, MessageError> {
        let len = value.len();
        if len > u16::MAX as usize {
            return Err(MessageError::StringTooLong(len));
        }
        let mut dst = self.reserve(2 + len)?;
        dst.put_u16_le(len as u16);
        dst.put_slice(value.as_bytes());
        Ok(self)
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("capacity", &self.capacity())
            .field("length", &self.length)
            .field("read_pos", &self.read_pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scalar_round_trip() {
        let mut msg = Message::new();
        msg.add_byte(0xAB)
            .unwrap()
            .add_u16(0xBEEF)
            .unwrap()
            .add_u32(0xDEAD_BEEF)
            .unwrap()
            .add_u64(u64::MAX - 7)
            .unwrap()
            .add_bytes(b"raw")
            .unwrap();

        assert_eq!(msg.message_length(), 1 + 2 + 4 + 8 + 3);
        assert_eq!(msg.get_byte().unwrap(), 0xAB);
        assert_eq!(msg.get_u16().unwrap(), 0xBEEF);
        assert_eq!(msg.get_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(msg.get_u64().unwrap(), u64::MAX - 7);
        assert_eq!(msg.get_raw(), b"raw");
    }

    #[test]
    fn test_little_endian_layout() {
        let mut msg = Message::new();
        msg.add_u32(0x0403_0201).unwrap();
        assert_eq!(msg.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_string_layout() {
        let mut msg = Message::new();
        msg.add_string("hi").unwrap();
        assert_eq!(msg.as_bytes(), &[2, 0, b'h', b'i']);
        assert_eq!(msg.get_string().unwrap(), "hi");
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn test_can_add_rejects_overflow() {
        let mut msg = Message::with_capacity(4);
        assert!(msg.can_add(4));
        assert!(!msg.can_add(5));

        msg.add_u16(1).unwrap();
        assert_eq!(
            msg.add_u32(2).unwrap_err(),
            MessageError::Overflow {
                needed: 4,
                available: 2
            }
        );
        // Failed append leaves the write cursor alone
        assert_eq!(msg.message_length(), 2);
        msg.add_u16(3).unwrap();
        assert!(msg.add_byte(4).is_err());
    }

    #[test]
    fn test_underflow_keeps_cursor() {
        let mut msg = Message::new();
        msg.add_u16(7).unwrap();
        assert_eq!(
            msg.get_u32().unwrap_err(),
            MessageError::Underflow {
                needed: 4,
                remaining: 2
            }
        );
        assert_eq!(msg.read_pos(), 0);
        assert_eq!(msg.get_u16().unwrap(), 7);
        assert!(msg.get_byte().is_err());
    }

    #[test]
    fn test_truncated_string_keeps_cursor() {
        let mut msg = Message::new();
        msg.add_u16(10).unwrap().add_bytes(b"abc").unwrap();
        assert!(matches!(
            msg.get_string(),
            Err(MessageError::Underflow { needed: 12, .. })
        ));
        assert_eq!(msg.read_pos(), 0);
    }

    #[test]
    fn test_invalid_utf8_string() {
        let mut msg = Message::new();
        msg.add_u16(2).unwrap().add_bytes(&[0xFF, 0xFE]).unwrap();
        assert_eq!(msg.get_string().unwrap_err(), MessageError::InvalidUtf8);
        assert_eq!(msg.read_pos(), 0);
    }

    #[test]
    fn test_string_too_long() {
        let mut msg = Message::with_capacity(70_000);
        let long = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            msg.add_string(&long),
            Err(MessageError::StringTooLong(_))
        ));
        assert_eq!(msg.message_length(), 0);
    }

    #[test]
    fn test_get_raw_does_not_consume() {
        let mut msg = Message::new();
        msg.add_bytes(b"\x01payload").unwrap();
        msg.get_byte().unwrap();
        assert_eq!(msg.get_raw(), b"payload");
        assert_eq!(msg.get_raw(), b"payload");
        assert_eq!(msg.read_pos(), 1);
    }

    #[test]
    fn test_skip_and_peek() {
        let mut msg = Message::new();
        msg.add_u16(0).unwrap().add_u32(99).unwrap();
        msg.skip_bytes(2).unwrap();
        assert_eq!(msg.peek_u32().unwrap(), 99);
        assert_eq!(msg.read_pos(), 2);
        assert!(msg.skip_bytes(5).is_err());
        assert_eq!(msg.read_pos(), 2);
    }

    #[test]
    fn test_set_message_length_after_raw_read() {
        let mut msg = Message::with_capacity(8);
        msg.buffer_mut()[..3].copy_from_slice(&[9, 8, 7]);
        msg.set_message_length(3);
        assert_eq!(msg.get_byte().unwrap(), 9);
        assert_eq!(msg.get_at(2).unwrap(), 7);
        assert!(msg.get_at(3).is_err());

        msg.set_message_length(100);
        assert_eq!(msg.message_length(), 8);
        assert_eq!(msg.read_pos(), 0);
    }

    #[test]
    fn test_reset() {
        let mut msg = Message::new();
        msg.add_u64(1).unwrap();
        msg.get_u32().unwrap();
        msg.reset();
        assert_eq!(msg.message_length(), 0);
        assert_eq!(msg.read_pos(), 0);
        assert!(msg.set_read_pos(1).is_err());
    }

    #[test]
    fn test_truncate_rolls_back_writes() {
        let mut msg = Message::new();
        msg.add_u32(1).unwrap().add_u32(2).unwrap();
        msg.get_u32().unwrap();
        msg.get_u16().unwrap();
        msg.truncate(4);
        assert_eq!(msg.message_length(), 4);
        assert_eq!(msg.read_pos(), 4);
        msg.truncate(16);
        assert_eq!(msg.message_length(), 4);
    }

    #[derive(Debug, Clone)]
    enum Value {
        Byte(u8),
        U16(u16),
        U32(u32),
        U64(u64),
        Bytes(Vec<u8>),
    }

    fn value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<u8>().prop_map(Value::Byte),
            any::<u16>().prop_map(Value::U16),
            any::<u32>().prop_map(Value::U32),
            any::<u64>().prop_map(Value::U64),
            prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        ]
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(Value),
        Skip(usize),
        ReadU32,
        ReadByte,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            value().prop_map(Op::Add),
            (0usize..16).prop_map(Op::Skip),
            Just(Op::ReadU32),
            Just(Op::ReadByte),
        ]
    }

    proptest! {
        #[test]
        fn prop_round_trip(values in prop::collection::vec(value(), 0..64)) {
            let mut msg = Message::with_capacity(4096);
            for v in &values {
                match v {
                    Value::Byte(b) => { msg.add_byte(*b).unwrap(); }
                    Value::U16(x) => { msg.add_u16(*x).unwrap(); }
                    Value::U32(x) => { msg.add_u32(*x).unwrap(); }
                    Value::U64(x) => { msg.add_u64(*x).unwrap(); }
                    Value::Bytes(b) => { msg.add_bytes(b).unwrap(); }
                }
            }
            for v in &values {
                match v {
                    Value::Byte(b) => prop_assert_eq!(msg.get_byte().unwrap(), *b),
                    Value::U16(x) => prop_assert_eq!(msg.get_u16().unwrap(), *x),
                    Value::U32(x) => prop_assert_eq!(msg.get_u32().unwrap(), *x),
                    Value::U64(x) => prop_assert_eq!(msg.get_u64().unwrap(), *x),
                    Value::Bytes(b) => {
                        prop_assert_eq!(&msg.get_raw()[..b.len()], &b[..]);
                        msg.skip_bytes(b.len()).unwrap();
                    }
                }
            }
            prop_assert_eq!(msg.remaining(), 0);
        }

        #[test]
        fn prop_interleavings_respect_bounds(
            capacity in 0usize..64,
            ops in prop::collection::vec(op(), 0..128),
        ) {
            let mut msg = Message::with_capacity(capacity);
            for op in ops {
                let (len, pos) = (msg.message_length(), msg.read_pos());
                let ok = match op {
                    Op::Add(Value::Byte(b)) => msg.add_byte(b).is_ok(),
                    Op::Add(Value::U16(x)) => msg.add_u16(x).is_ok(),
                    Op::Add(Value::U32(x)) => msg.add_u32(x).is_ok(),
                    Op::Add(Value::U64(x)) => msg.add_u64(x).is_ok(),
                    Op::Add(Value::Bytes(b)) => msg.add_bytes(&b).is_ok(),
                    Op::Skip(n) => msg.skip_bytes(n).is_ok(),
                    Op::ReadU32 => msg.get_u32().is_ok(),
                    Op::ReadByte => msg.get_byte().is_ok(),
                };
                if !ok {
                    prop_assert_eq!(msg.message_length(), len);
                    prop_assert_eq!(msg.read_pos(), pos);
                }
                prop_assert!(msg.read_pos() <= msg.message_length());
                prop_assert!(msg.message_length() <= msg.capacity());
            }
        }
    }
}
