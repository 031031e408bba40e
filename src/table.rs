//! Per-session identity tables.
//!
//! The write side maps object identities and class names to the indices they
//! were first written under; the read side keeps the inverse, index-ordered
//! slot list. Both sides assign indices densely in first-seen order and are
//! truncated together by flush tokens, which keeps them in lock step.

use std::collections::HashMap;
use std::fmt;

use crate::handle::Handle;

/// Stream index of an object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Stream index of a class.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn next_index(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Table sizes captured by `push()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mark {
    /// Object table size at the time of the mark.
    pub objects: usize,
    /// Class table size at the time of the mark.
    pub classes: usize,
}

/// Write-side object table.
///
/// Holds a clone of every written handle so an address cannot be recycled by
/// a new allocation while it is still in the table.
#[derive(Debug, Default)]
pub struct ObjectTable {
    ids: HashMap<usize, ObjectId>,
    handles: Vec<Handle>,
}

impl ObjectTable {
    /// Index of an already written object.
    pub fn get(&self, handle: &Handle) -> Option<ObjectId> {
        self.ids.get(&handle.addr()).copied()
    }

    /// Records a new object and returns its index.
    pub fn insert(&mut self, handle: Handle) -> ObjectId {
        let id = ObjectId::new(next_index(self.handles.len()));
        self.ids.insert(handle.addr(), id);
        self.handles.push(handle);
        id
    }

    /// Number of objects in the table.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if no object has been recorded.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Forgets every object with an index `>= len`.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.handles.len() {
            return;
        }
        for handle in self.handles.drain(len..) {
            self.ids.remove(&handle.addr());
        }
    }
}

/// Write-side class table, keyed by canonical class name.
#[derive(Debug, Default)]
pub struct ClassTable {
    ids: HashMap<String, ClassId>,
    names: Vec<String>,
}

impl ClassTable {
    /// Index of an already written class.
    pub fn get(&self, name: &str) -> Option<ClassId> {
        self.ids.get(name).copied()
    }

    /// Records a new class and returns its index.
    pub fn insert(&mut self, name: &str) -> ClassId {
        let id = ClassId::new(next_index(self.names.len()));
        self.ids.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        id
    }

    /// Number of classes in the table.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no class has been recorded.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Forgets every class with an index `>= len`.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.names.len() {
            return;
        }
        for name in self.names.drain(len..) {
            self.ids.remove(&name);
        }
    }
}

/// Lifecycle of a read-side slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Allocated, parts still being read.
    Reserved,
    /// `}` consumed.
    Finalized,
}

/// What a read-side slot holds.
#[derive(Debug)]
pub enum SlotObject {
    /// A constructed object.
    Live(Handle),
    /// An object consumed while skipping data whose class could not be
    /// constructed locally. Keeps the stream class name for diagnostics.
    Unconstructed(String),
}

#[derive(Debug)]
struct Slot {
    object: SlotObject,
    state: SlotState,
}

/// Read-side object table.
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    /// Reserves the next index for `object`.
    pub fn reserve(&mut self, object: SlotObject) -> ObjectId {
        let id = ObjectId::new(next_index(self.slots.len()));
        self.slots.push(Slot {
            object,
            state: SlotState::Reserved,
        });
        id
    }

    /// Marks a slot as complete.
    pub fn finalize(&mut self, id: ObjectId) {
        if let Some(slot) = self.slots.get_mut(id.as_u32() as usize) {
            slot.state = SlotState::Finalized;
        }
    }

    /// Looks up a slot, `None` if the index was never reserved.
    pub fn get(&self, index: u32) -> Option<(&SlotObject, SlotState)> {
        self.slots
            .get(index as usize)
            .map(|slot| (&slot.object, slot.state))
    }

    /// Number of reserved slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing has been reserved.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drops every slot with an index `>= len`.
    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }
}
