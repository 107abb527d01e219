//! Sortable unique identifiers for tasks, plates, worklists, and requests.
//!
//! Identifiers are ULIDs rendered as 26-character Crockford base32 strings.
//! A process-wide monotonic generator guarantees that two ids minted in the
//! same millisecond still sort in creation order.

use std::sync::{LazyLock, Mutex};

use ulid::{Generator, Ulid};

static GLOBAL: LazyLock<IdGenerator> = LazyLock::new(IdGenerator::new);

/// Mint a new identifier from the process-wide generator.
pub fn new_id() -> String {
    GLOBAL.next_id()
}

/// A monotonic ULID generator.
///
/// Separate generators are independent; ids from one generator are strictly
/// increasing.
pub struct IdGenerator {
    inner: Mutex<Generator>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// Next identifier as a string.
    pub fn next_id(&self) -> String {
        self.next_ulid().to_string()
    }

    /// Next identifier as a raw `Ulid`.
    ///
    /// If the random component overflows within one millisecond the
    /// generator falls back to a fresh, non-monotonic ULID.
    pub fn next_ulid(&self) -> Ulid {
        let mut generator = self.inner.lock().expect("id generator mutex poisoned");
        generator.generate().unwrap_or_else(|_| Ulid::new())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
