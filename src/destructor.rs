//! Destructors tear down whatever a block's payload owns.
//!
//! A destructor runs once, when a block's refcount reaches zero, and before
//! its storage goes back to the allocator. It releases the nested blocks the
//! payload holds and must not free the block itself.
//!
//! Four built-in shapes cover single-value captures (a closure capturing one
//! string, one struct, and so on). Generated struct, enum and list layouts
//! register their own destructor that walks every owned field the same way.

use crate::block::BlockRef;
use crate::heap::Heap;
use crate::value::{read_word, ClosureValue, Payload, StringValue};

const CUSTOM_BASE: u64 = 5;


/// handle to a destructor registered with `Heap::register_destructor`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CustomDestructor(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Destructor {
    /// nothing owned: plain numbers and flags.
    Noop,
    /// payload starts with one string value.
    NestedString,
    /// payload starts with one block handle (struct, enum or list).
    NestedRef,
    /// payload starts with one closure value.
    NestedClosure,
    Custom(CustomDestructor),
}

impl Destructor {
    /// the word stored in a block header. zero means "no destructor".
    pub fn code(destructor: Option<Destructor>) -> u64 {
        match destructor {
            None => 0,
            Some(Destructor::Noop) => 1,
            Some(Destructor::NestedString) => 2,
            Some(Destructor::NestedRef) => 3,
            Some(Destructor::NestedClosure) => 4,
            Some(Destructor::Custom(CustomDestructor(id))) => CUSTOM_BASE + id as u64,
        }
    }

    pub fn from_code(code: u64) -> Option<Destructor> {
        match code {
            0 => None,
            1 => Some(Destructor::Noop),
            2 => Some(Destructor::NestedString),
            3 => Some(Destructor::NestedRef),
            4 => Some(Destructor::NestedClosure),
            n => Some(Destructor::Custom(CustomDestructor((n - CUSTOM_BASE) as u32))),
        }
    }

    pub fn run(self, heap: &mut Heap, block: BlockRef) {
        match self {
            Destructor::Noop => {}
            Destructor::NestedString => heap.release_at(Shape::String, block, 0),
            Destructor::NestedRef => heap.release_at(Shape::Struct, block, 0),
            Destructor::NestedClosure => heap.release_at(Shape::Closure, block, 0),
            Destructor::Custom(CustomDestructor(id)) => {
                // clone the callback out so it can borrow the heap mutably.
                let f = heap.destructors[id as usize].clone();
                f(heap, block);
            }
        }
    }
}


/// the shape of one runtime value as it sits in a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    Unit,
    Bool,
    Int,
    Float,
    String,
    Struct,
    Enum,
    Closure,
    List,
}

impl Shape {
    /// bytes the value takes up in a payload.
    pub fn size(self) -> usize {
        match self {
            Shape::Unit | Shape::Bool => 1,
            Shape::Int | Shape::Float => 8,
            Shape::String => StringValue::SIZE,
            Shape::Struct | Shape::Enum | Shape::List => <Option<BlockRef>>::SIZE,
            Shape::Closure => ClosureValue::SIZE,
        }
    }

    pub fn owns_blocks(self) -> bool {
        !matches!(self, Shape::Unit | Shape::Bool | Shape::Int | Shape::Float)
    }

    /// the built-in destructor for a block capturing exactly one of these.
    pub fn destructor(self) -> Destructor {
        match self {
            Shape::Unit | Shape::Bool | Shape::Int | Shape::Float => Destructor::Noop,
            Shape::String => Destructor::NestedString,
            Shape::Struct | Shape::Enum | Shape::List => Destructor::NestedRef,
            Shape::Closure => Destructor::NestedClosure,
        }
    }

    /// the block owned by a value of this shape encoded at the front of `bytes`.
    pub fn owned_block(self, bytes: &[u8]) -> Option<BlockRef> {
        match self {
            Shape::Unit | Shape::Bool | Shape::Int | Shape::Float => None,
            Shape::String => StringValue::decode(&bytes[.. StringValue::SIZE]).block(),
            Shape::Struct | Shape::Enum | Shape::List => BlockRef::from_bits(read_word(bytes, 0)),
            Shape::Closure => ClosureValue::decode(&bytes[.. ClosureValue::SIZE]).env,
        }
    }
}


impl Heap {
    /// register a destructor for a generated layout. it gets the dying block
    /// and releases every owned value in the payload, usually with `release_at`.
    pub fn register_destructor<F>(&mut self, f: F) -> Destructor
    where
        F: Fn(&mut Heap, BlockRef) + 'static,
    {
        let id = self.destructors.len() as u32;
        self.destructors.push(std::rc::Rc::new(f));
        Destructor::Custom(CustomDestructor(id))
    }

    /// release the value of shape `shape` stored in `block`'s payload at `offset`.
    pub fn release_at(&mut self, shape: Shape, block: BlockRef, offset: usize) {
        let owned = shape.owned_block(&self.payload(block)[offset..]);
        self.release(owned);
    }

    /// retain the value of shape `shape` stored in `block`'s payload at `offset`.
    pub fn retain_at(&mut self, shape: Shape, block: BlockRef, offset: usize) {
        let owned = shape.owned_block(&self.payload(block)[offset..]);
        self.retain(owned);
    }

    /// allocate a block capturing one value of `shape`, with the matching
    /// built-in destructor. the payload starts zeroed, i.e. holding a null
    /// handle, so releasing it unfilled is harmless.
    pub fn capture(&mut self, shape: Shape) -> BlockRef {
        self.allocate_block(shape.size(), Some(shape.destructor()))
    }
}
