use core::convert::TryInto;
use core::str;
use crate::block::BlockRef;
use crate::error::{report_and_terminate, AllocError};
use crate::heap::Heap;

// payload words are little-endian u64s.

#[inline]
pub fn read_word(bytes: &[u8], offset: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[offset .. offset + 8]);
    u64::from_le_bytes(word)
}

#[inline]
pub fn write_word(bytes: &mut [u8], offset: usize, word: u64) {
    bytes[offset .. offset + 8].copy_from_slice(&word.to_le_bytes());
}


/// a runtime value with a fixed-size encoding inside a payload.
pub trait Payload: Sized {
    const SIZE: usize;
    fn encode(&self, out: &mut [u8]);
    fn decode(bytes: &[u8]) -> Self;
}

impl Payload for () {
    const SIZE: usize = 1;
    fn encode(&self, out: &mut [u8]) { out[0] = 0 }
    fn decode(_: &[u8]) -> Self {}
}

impl Payload for bool {
    const SIZE: usize = 1;
    fn encode(&self, out: &mut [u8]) { out[0] = *self as u8 }
    fn decode(bytes: &[u8]) -> Self { bytes[0] != 0 }
}

impl Payload for u64 {
    const SIZE: usize = 8;
    fn encode(&self, out: &mut [u8]) { write_word(out, 0, *self) }
    fn decode(bytes: &[u8]) -> Self { read_word(bytes, 0) }
}

impl Payload for i64 {
    const SIZE: usize = 8;
    fn encode(&self, out: &mut [u8]) { write_word(out, 0, *self as u64) }
    fn decode(bytes: &[u8]) -> Self { read_word(bytes, 0) as i64 }
}

impl Payload for f64 {
    const SIZE: usize = 8;
    fn encode(&self, out: &mut [u8]) { write_word(out, 0, self.to_bits()) }
    fn decode(bytes: &[u8]) -> Self { f64::from_bits(read_word(bytes, 0)) }
}

/// structs, enums and lists are stored as a bare (possibly null) handle.
impl Payload for Option<BlockRef> {
    const SIZE: usize = 8;
    fn encode(&self, out: &mut [u8]) { write_word(out, 0, BlockRef::to_bits(*self)) }
    fn decode(bytes: &[u8]) -> Self { BlockRef::from_bits(read_word(bytes, 0)) }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LiteralId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StringStorage {
    Empty,
    /// static text baked into the program. never reference counted.
    Literal(LiteralId),
    /// utf-8 bytes in a block of their own.
    Heap(BlockRef),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StringValue {
    pub storage: StringStorage,
    pub length_bytes: u64,
    pub length_points: u64,
}

impl StringValue {
    pub const EMPTY: StringValue = StringValue { storage: StringStorage::Empty, length_bytes: 0, length_points: 0 };

    /// the backing block, if the string owns one.
    pub fn block(&self) -> Option<BlockRef> {
        match self.storage {
            StringStorage::Heap(block) => Some(block),
            _ => None,
        }
    }
}

// [block][literal id + 1][bytes][points]
impl Payload for StringValue {
    const SIZE: usize = 32;

    fn encode(&self, out: &mut [u8]) {
        let (block, literal) = match self.storage {
            StringStorage::Empty => (0, 0),
            StringStorage::Literal(LiteralId(id)) => (0, id as u64 + 1),
            StringStorage::Heap(block) => (BlockRef::to_bits(Some(block)), 0),
        };
        write_word(out, 0, block);
        write_word(out, 8, literal);
        write_word(out, 16, self.length_bytes);
        write_word(out, 24, self.length_points);
    }

    fn decode(bytes: &[u8]) -> Self {
        let storage = match (BlockRef::from_bits(read_word(bytes, 0)), read_word(bytes, 8)) {
            (Some(block), _) => StringStorage::Heap(block),
            (None, 0) => StringStorage::Empty,
            (None, literal) => StringStorage::Literal(LiteralId((literal - 1) as u32)),
        };
        StringValue { storage, length_bytes: read_word(bytes, 16), length_points: read_word(bytes, 24) }
    }
}


/// opaque reference to the code a closure runs. the heap never looks inside.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntryPoint(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClosureValue {
    /// captured environment; null when nothing was captured.
    pub env: Option<BlockRef>,
    pub body: EntryPoint,
}

impl ClosureValue {
    pub const NULL: ClosureValue = ClosureValue { env: None, body: EntryPoint(0) };

    pub fn new(env: Option<BlockRef>, body: EntryPoint) -> ClosureValue {
        ClosureValue { env, body }
    }
}

impl Payload for ClosureValue {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut [u8]) {
        write_word(out, 0, BlockRef::to_bits(self.env));
        write_word(out, 8, self.body.0);
    }

    fn decode(bytes: &[u8]) -> Self {
        ClosureValue { env: BlockRef::from_bits(read_word(bytes, 0)), body: EntryPoint(read_word(bytes, 8)) }
    }
}


impl Heap {
    /// copy `text` into a fresh block. the bytes own nothing, so the block
    /// gets no destructor.
    pub fn alloc_string(&mut self, text: &str) -> StringValue {
        if text.is_empty() { return StringValue::EMPTY }
        let block = self.allocate_block(text.len(), None);
        self.payload_mut(block)[.. text.len()].copy_from_slice(text.as_bytes());
        StringValue {
            storage: StringStorage::Heap(block),
            length_bytes: text.len() as u64,
            length_points: text.chars().count() as u64,
        }
    }

    /// wrap static text without copying it. the same literal always gets the
    /// same id, so evaluating it in a loop doesn't grow the table.
    pub fn literal(&mut self, text: &'static str) -> StringValue {
        self.try_literal(text).unwrap_or_else(|e| report_and_terminate(&e))
    }

    pub fn try_literal(&mut self, text: &'static str) -> Result<StringValue, AllocError> {
        if text.is_empty() { return Ok(StringValue::EMPTY) }
        let key = (text.as_ptr() as usize, text.len());
        let id = match self.literal_ids.get(&key).copied() {
            Some(id) => id,
            None => {
                let id = LiteralId(self.literals.len().try_into().map_err(|_| AllocError::LiteralTableFull)?);
                self.literals.push(text);
                self.literal_ids.insert(key, id);
                log::trace!("literal: {:?} -> {:?}", text, id);
                id
            }
        };
        Ok(StringValue {
            storage: StringStorage::Literal(id),
            length_bytes: text.len() as u64,
            length_points: text.chars().count() as u64,
        })
    }

    pub fn string_bytes(&self, s: &StringValue) -> &[u8] {
        match s.storage {
            StringStorage::Empty => &[],
            StringStorage::Literal(LiteralId(id)) => self.literals[id as usize].as_bytes(),
            StringStorage::Heap(block) => &self.payload(block)[.. s.length_bytes as usize],
        }
    }

    /// the text, or `None` if someone scribbled invalid utf-8 into the block.
    pub fn string_str(&self, s: &StringValue) -> Option<&str> {
        str::from_utf8(self.string_bytes(s)).ok()
    }

    pub fn retain_string(&mut self, s: &StringValue) {
        self.retain(s.block());
    }

    pub fn release_string(&mut self, s: &StringValue) {
        self.release(s.block());
    }

    pub fn retain_closure(&mut self, c: &ClosureValue) {
        self.retain(c.env);
    }

    pub fn release_closure(&mut self, c: &ClosureValue) {
        self.release(c.env);
    }
}


#[cfg(test)]
mod tests {
    use crate::{ClosureValue, EntryPoint, Heap, Payload, StringStorage, StringValue};

    #[test]
    fn words() {
        let mut bytes = [0u8; 16];
        super::write_word(&mut bytes, 8, 0x0102);
        assert_eq!(bytes[8], 2);
        assert_eq!(bytes[9], 1);
        assert_eq!(super::read_word(&bytes, 8), 0x0102);
    }

    #[test]
    fn heap_string() {
        let mut h = Heap::new();
        let s = h.alloc_string("héllo");
        assert_eq!(s.length_bytes, 6);
        assert_eq!(s.length_points, 5);
        assert_eq!(h.string_str(&s), Some("héllo"));
        assert!(s.block().is_some());
        h.release_string(&s);
        assert_eq!(h.stats().blocks_live, 0);
    }

    #[test]
    fn literal_string_is_not_counted() {
        let mut h = Heap::new();
        let s = h.literal("static text");
        assert_eq!(s.storage, StringStorage::Literal(crate::LiteralId(0)));
        h.retain_string(&s);
        h.release_string(&s);
        h.release_string(&s);
        assert_eq!(h.string_str(&s), Some("static text"));
        assert_eq!(h.stats().blocks_live, 0);
    }

    #[test]
    fn literals_are_interned() {
        let mut h = Heap::new();
        let text: &'static str = "same";
        let mut last = h.literal(text);
        for _ in 0..1000 {
            let s = h.literal(text);
            assert_eq!(s, last);
            last = s;
        }
        assert_eq!(last.storage, StringStorage::Literal(crate::LiteralId(0)));
        assert_eq!(h.literals.len(), 1);

        let other = h.literal("other text");
        assert_eq!(other.storage, StringStorage::Literal(crate::LiteralId(1)));
        assert_eq!(h.try_literal(text), Ok(last));
        assert_eq!(h.string_str(&last), Some("same"));
        assert_eq!(h.string_str(&other), Some("other text"));
        assert_eq!(h.try_literal(""), Ok(StringValue::EMPTY));
    }

    #[test]
    fn empty_string() {
        let mut h = Heap::new();
        assert_eq!(h.alloc_string(""), StringValue::EMPTY);
        assert_eq!(h.string_bytes(&StringValue::EMPTY), b"");
        h.release_string(&StringValue::EMPTY);
    }

    #[test]
    fn string_encoding() {
        let mut h = Heap::new();
        let heap_string = h.alloc_string("abc");
        let literal = h.literal("xyz");
        let mut bytes = [0u8; 32];
        for s in [ heap_string, literal, StringValue::EMPTY ].iter() {
            s.encode(&mut bytes);
            assert_eq!(StringValue::decode(&bytes), *s);
        }
    }

    #[test]
    fn closure_encoding() {
        let mut h = Heap::new();
        let env = h.capture(crate::Shape::Bool);
        let c = ClosureValue::new(Some(env), EntryPoint(99));
        let mut bytes = [0u8; 16];
        c.encode(&mut bytes);
        assert_eq!(ClosureValue::decode(&bytes), c);
        ClosureValue::NULL.encode(&mut bytes);
        assert_eq!(ClosureValue::decode(&bytes), ClosureValue::NULL);
        h.release_closure(&c);
        h.release_closure(&ClosureValue::NULL);
        assert_eq!(h.stats().blocks_live, 0);
    }
}
