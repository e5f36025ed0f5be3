// Handle-based identity for entities and backend collidables

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a physics entity, independent of whether it is inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) u64);

impl EntityId {
    /// Allocate a fresh, process-unique ID
    pub(crate) fn next() -> Self {
        Self(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Integer identity assigned by the backend when a collidable is inserted.
///
/// Stable until removal, then recycled for later insertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(pub(crate) i32);

impl BodyHandle {
    /// Raw value stored on entities that are not inserted
    pub const INVALID_RAW: i32 = -1;

    pub fn from_raw(raw: i32) -> Option<Self> {
        (raw >= 0).then_some(Self(raw))
    }

    pub fn raw(&self) -> i32 {
        self.0
    }
}

/// How the backend moves a collidable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mobility {
    Dynamic = 0,
    Kinematic = 1,
    Static = 2,
}

impl Mobility {
    pub(crate) fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Mobility::Dynamic),
            1 => Some(Mobility::Kinematic),
            2 => Some(Mobility::Static),
            _ => None,
        }
    }

    /// Statics live in the static collection, everything else is a body
    pub fn is_body(&self) -> bool {
        !matches!(self, Mobility::Static)
    }
}

/// Reference to a collidable as the backend reports it to callbacks and queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollidableRef {
    pub mobility: Mobility,
    pub handle: BodyHandle,
}

impl CollidableRef {
    pub fn new(mobility: Mobility, handle: BodyHandle) -> Self {
        Self { mobility, handle }
    }
}

/// Pair of collidables the narrow phase is considering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollidablePair {
    pub a: CollidableRef,
    pub b: CollidableRef,
}

/// Recycling allocator for backend handles
///
/// Released IDs are handed out again before new ones are minted.
#[derive(Debug, Clone, Default)]
pub struct IdPool {
    next: i32,
    free: Vec<i32>,
}

impl IdPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an ID, reusing a released one if available
    pub fn take(&mut self) -> BodyHandle {
        match self.free.pop() {
            Some(id) => BodyHandle(id),
            None => {
                let id = self.next;
                self.next += 1;
                BodyHandle(id)
            }
        }
    }

    /// Return an ID to the pool
    pub fn release(&mut self, handle: BodyHandle) {
        debug_assert!(handle.0 < self.next, "released a handle this pool never issued");
        self.free.push(handle.0);
    }

    /// Forget every issued ID
    pub fn clear(&mut self) {
        self.next = 0;
        self.free.clear();
    }

    /// Number of IDs currently issued
    pub fn in_use(&self) -> usize {
        self.next as usize - self.free.len()
    }
}
