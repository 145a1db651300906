//! Lists: a block holding a small header, plus a separate element buffer.
//!
//! The buffer is raw memory from `buffer_allocate`, not a block of its own,
//! so it has no refcount; the list's destructor releases each element and
//! then frees the buffer. Short lists land in the slab buckets, long ones
//! spill over to the fallback allocator.
//!
//! Growth: the first push reserves `INITIAL_CAPACITY` elements, and a full
//! buffer doubles.

use crate::block::BlockRef;
use crate::destructor::{Destructor, Shape};
use crate::heap::Heap;
use crate::region::BufferRef;
use crate::value::{read_word, write_word, Payload};

pub const INITIAL_CAPACITY: usize = 4;

const SHAPES: [Shape; 9] = [
    Shape::Unit, Shape::Bool, Shape::Int, Shape::Float, Shape::String,
    Shape::Struct, Shape::Enum, Shape::Closure, Shape::List,
];


/// a list value. lists sit in payloads as a plain handle (`Shape::List`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListValue(pub BlockRef);

impl ListValue {
    #[inline]
    pub fn handle(self) -> Option<BlockRef> {
        Some(self.0)
    }
}


// [buffer][capacity][length][element shape]
#[derive(Clone, Copy, Debug, PartialEq)]
struct ListHeader {
    buffer: Option<BufferRef>,
    capacity: usize,
    length: usize,
    element: Shape,
}

impl Payload for ListHeader {
    const SIZE: usize = 32;

    fn encode(&self, out: &mut [u8]) {
        write_word(out, 0, self.buffer.map_or(0, |b| b.to_bits().get()));
        write_word(out, 8, self.capacity as u64);
        write_word(out, 16, self.length as u64);
        let shape = SHAPES.iter().position(|s| *s == self.element).unwrap_or(0);
        write_word(out, 24, shape as u64);
    }

    fn decode(bytes: &[u8]) -> Self {
        ListHeader {
            buffer: core::num::NonZeroU64::new(read_word(bytes, 0)).map(BufferRef::from_bits),
            capacity: read_word(bytes, 8) as usize,
            length: read_word(bytes, 16) as usize,
            element: SHAPES[read_word(bytes, 24) as usize],
        }
    }
}


impl Heap {
    pub fn list_new(&mut self, element: Shape) -> ListValue {
        let destructor = self.list_destructor(element);
        let block = self.allocate_block(ListHeader::SIZE, Some(destructor));
        self.store(block, 0, &ListHeader { buffer: None, capacity: 0, length: 0, element });
        ListValue(block)
    }

    /// one destructor per element shape, registered on first use.
    fn list_destructor(&mut self, element: Shape) -> Destructor {
        if let Some(d) = self.list_destructors.get(&element) { return *d }
        let d = self.register_destructor(move |heap, block| {
            let header: ListHeader = heap.load(block, 0);
            let buffer = match header.buffer { Some(b) => b, None => return };
            if element.owns_blocks() {
                let size = element.size();
                for i in 0..header.length {
                    let owned = element.owned_block(&heap.buffer(buffer)[i * size ..]);
                    heap.release(owned);
                }
            }
            heap.buffer_free(buffer);
        });
        self.list_destructors.insert(element, d);
        d
    }

    pub fn list_len(&self, list: ListValue) -> usize {
        self.load::<ListHeader>(list.0, 0).length
    }

    pub fn list_capacity(&self, list: ListValue) -> usize {
        self.load::<ListHeader>(list.0, 0).capacity
    }

    pub fn list_element(&self, list: ListValue) -> Shape {
        self.load::<ListHeader>(list.0, 0).element
    }

    /// append `value`, moving its reference into the list.
    pub fn list_push<T: Payload>(&mut self, list: ListValue, value: &T) {
        let mut header: ListHeader = self.load(list.0, 0);
        let size = header.element.size();
        assert_eq!(T::SIZE, size, "pushing a {}-byte value onto a list of {:?}", T::SIZE, header.element);

        if header.length == header.capacity {
            let capacity = if header.capacity == 0 { INITIAL_CAPACITY } else { header.capacity * 2 };
            let buffer = self.buffer_allocate(capacity * size);
            if let Some(old) = header.buffer {
                let used = header.length * size;
                let elements = self.buffer(old)[.. used].to_vec();
                self.buffer_mut(buffer)[.. used].copy_from_slice(&elements);
                self.buffer_free(old);
            }
            log::trace!("list {:?}: grow {} -> {}", list.0, header.capacity, capacity);
            header.buffer = Some(buffer);
            header.capacity = capacity;
        }

        if let Some(buffer) = header.buffer {
            let offset = header.length * size;
            value.encode(&mut self.buffer_mut(buffer)[offset .. offset + size]);
        }
        header.length += 1;
        self.store(list.0, 0, &header);
    }

    /// read element `index` without touching refcounts. retain it if you keep it.
    pub fn list_get<T: Payload>(&self, list: ListValue, index: usize) -> Option<T> {
        let header: ListHeader = self.load(list.0, 0);
        let size = header.element.size();
        assert_eq!(T::SIZE, size, "reading a {}-byte value from a list of {:?}", T::SIZE, header.element);
        if index >= header.length { return None }
        let buffer = header.buffer?;
        Some(T::decode(&self.buffer(buffer)[index * size .. (index + 1) * size]))
    }

    /// overwrite element `index`, releasing what was there and taking over
    /// the reference in `value`. returns false if `index` is out of range.
    pub fn list_set<T: Payload>(&mut self, list: ListValue, index: usize, value: &T) -> bool {
        let header: ListHeader = self.load(list.0, 0);
        let buffer = match header.buffer {
            Some(b) if index < header.length => b,
            _ => return false,
        };
        let size = header.element.size();
        assert_eq!(T::SIZE, size, "storing a {}-byte value into a list of {:?}", T::SIZE, header.element);
        let offset = index * size;
        let old = header.element.owned_block(&self.buffer(buffer)[offset ..]);
        value.encode(&mut self.buffer_mut(buffer)[offset .. offset + size]);
        self.release(old);
        true
    }

    /// take the last element out, handing its reference to the caller.
    pub fn list_pop<T: Payload>(&mut self, list: ListValue) -> Option<T> {
        let mut header: ListHeader = self.load(list.0, 0);
        if header.length == 0 { return None }
        let value = self.list_get(list, header.length - 1);
        header.length -= 1;
        self.store(list.0, 0, &header);
        value
    }
}


#[cfg(test)]
mod tests {
    use crate::{Heap, Shape, StringValue};
    use super::INITIAL_CAPACITY;

    #[test]
    fn push_and_grow() {
        let mut h = Heap::new();
        let list = h.list_new(Shape::Int);
        assert_eq!(h.list_len(list), 0);
        assert_eq!(h.list_capacity(list), 0);
        for i in 0..9i64 { h.list_push(list, &(i * 10)); }
        assert_eq!(h.list_len(list), 9);
        assert_eq!(h.list_capacity(list), INITIAL_CAPACITY * 4);
        for i in 0..9 { assert_eq!(h.list_get::<i64>(list, i), Some(i as i64 * 10)); }
        assert_eq!(h.list_get::<i64>(list, 9), None);
        // 16 ints = 128 bytes, past the slabs. the 32 and 64 byte buffers went back.
        assert_eq!(h.stats().fallback_live, 1);
        assert_eq!(h.stats().buckets[2].free, 1);
        h.release(list.handle());
        assert_eq!(h.stats().fallback_live, 0);
        assert_eq!(h.stats().blocks_live, 0);
    }

    #[test]
    fn releases_elements() {
        let mut h = Heap::new();
        let list = h.list_new(Shape::String);
        let a = h.alloc_string("alpha");
        let b = h.alloc_string("beta");
        h.list_push(list, &a);
        h.list_push(list, &b);
        h.retain_string(&b);
        h.release(list.handle());
        assert!(!h.is_live(a.block().unwrap()));
        assert_eq!(h.reference_count(b.block().unwrap()), 1);
        h.release_string(&b);
        assert_eq!(h.stats().blocks_live, 0);
    }

    #[test]
    fn set_releases_old_value() {
        let mut h = Heap::new();
        let list = h.list_new(Shape::String);
        let a = h.alloc_string("old");
        h.list_push(list, &a);
        let b = h.alloc_string("new");
        assert!(h.list_set(list, 0, &b));
        assert!(!h.is_live(a.block().unwrap()));
        let got: StringValue = h.list_get(list, 0).unwrap();
        assert_eq!(h.string_str(&got), Some("new"));
        assert!(!h.list_set(list, 1, &b));
        h.release(list.handle());
        assert_eq!(h.stats().blocks_live, 0);
    }

    #[test]
    fn pop_hands_over_reference() {
        let mut h = Heap::new();
        let list = h.list_new(Shape::Struct);
        let item = h.allocate(8, None);
        h.list_push(list, &item);
        let popped = h.list_pop::<Option<crate::BlockRef>>(list).unwrap();
        assert_eq!(popped, item);
        assert_eq!(h.list_len(list), 0);
        h.release(list.handle());
        assert!(h.is_live(item.unwrap()));
        h.release(popped);
        assert_eq!(h.stats().blocks_live, 0);
    }

    #[test]
    #[should_panic(expected = "reading a 8-byte value from a list of Bool")]
    fn get_checks_element_size() {
        let mut h = Heap::new();
        let list = h.list_new(Shape::Bool);
        h.list_push(list, &true);
        h.list_get::<i64>(list, 0);
    }

    #[test]
    #[should_panic(expected = "reading a 1-byte value from a list of Int")]
    fn pop_checks_element_size() {
        let mut h = Heap::new();
        let list = h.list_new(Shape::Int);
        h.list_push(list, &7i64);
        h.list_pop::<bool>(list);
    }

    #[test]
    fn lists_of_lists() {
        let mut h = Heap::new();
        let outer = h.list_new(Shape::List);
        let inner = h.list_new(Shape::Float);
        h.list_push(inner, &1.5f64);
        h.list_push(outer, &inner.handle());
        assert_eq!(h.list_element(outer), Shape::List);
        h.release(outer.handle());
        assert_eq!(h.stats().blocks_live, 0);
        assert_eq!(h.stats().buckets[2].live, 0);
    }
}
