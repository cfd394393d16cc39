//! Cursor Registry
//!
//! Owns the set of cursor entities and advances their simulated state each
//! tick. All reads and writes are serialized through one coarse lock; callers
//! take snapshot copies under the lock and iterate outside it. This bounds
//! throughput but guarantees no lost updates and no torn reads. Adequate for
//! a low command rate and a ~60 Hz tick, and documented as the scalability
//! ceiling of the design.

mod behavior;

pub use behavior::{step, Behavior, Color, Cursor, Vec2};

use parking_lot::Mutex;

struct RegistryInner {
    cursors: Vec<Cursor>,
    next_id: u64,
}

/// Ordered collection of cursors plus the monotonic id allocator.
pub struct CursorRegistry {
    inner: Mutex<RegistryInner>,
}

impl CursorRegistry {
    /// Create an empty registry; ids start at 1.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                cursors: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Insert a cursor. An id of 0 allocates the next id; an explicit id is
    /// honored and the allocator advances past it so it is never reused.
    pub fn add(&self, mut cursor: Cursor) -> u64 {
        let mut inner = self.inner.lock();
        if cursor.id == 0 {
            cursor.id = inner.next_id;
            inner.next_id += 1;
        } else if cursor.id >= inner.next_id {
            inner.next_id = cursor.id + 1;
        }
        let id = cursor.id;
        inner.cursors.push(cursor);
        id
    }

    /// Remove by id. Returns false if absent; reported, not fatal.
    pub fn remove(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.cursors.len();
        inner.cursors.retain(|c| c.id != id);
        inner.cursors.len() != before
    }

    /// Remove every cursor, returning them so the caller can tear down any
    /// associated script bridges.
    pub fn clear(&self) -> Vec<Cursor> {
        let mut inner = self.inner.lock();
        std::mem::take(&mut inner.cursors)
    }

    /// Copy of the full cursor list, in insertion order.
    pub fn snapshot(&self) -> Vec<Cursor> {
        self.inner.lock().cursors.clone()
    }

    /// Number of live cursors.
    pub fn len(&self) -> usize {
        self.inner.lock().cursors.len()
    }

    /// True when no cursors are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a cursor with this id exists.
    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().cursors.iter().any(|c| c.id == id)
    }

    /// Current position of a cursor, if present.
    pub fn position_of(&self, id: u64) -> Option<Vec2> {
        self.inner
            .lock()
            .cursors
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.pos)
    }

    /// Mutate one cursor in place under the lock. Returns the behavior name
    /// after mutation, or None if the id is absent.
    pub fn apply<F>(&self, id: u64, f: F) -> Option<&'static str>
    where
        F: FnOnce(&mut Cursor),
    {
        let mut inner = self.inner.lock();
        let cursor = inner.cursors.iter_mut().find(|c| c.id == id)?;
        f(cursor);
        Some(cursor.behavior.name())
    }

    /// Advance every cursor by `dt` seconds against the reference pointer.
    pub fn update(&self, dt: f64, reference: Vec2) {
        let mut inner = self.inner.lock();
        for cursor in &mut inner.cursors {
            step(cursor, dt, reference);
        }
    }
}

impl Default for CursorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
