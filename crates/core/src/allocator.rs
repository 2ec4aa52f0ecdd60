use crate::model::NumberedSet;

/// Hands out indices for one directory pass, filling gaps left by deleted
/// numbered files before appending past the current maximum.
#[derive(Debug, Clone, Default)]
pub struct IndexAllocator {
    used: NumberedSet,
    cursor: u64,
}

impl IndexAllocator {
    pub fn seed(numbered: impl IntoIterator<Item = u64>) -> Self {
        Self {
            used: numbered.into_iter().collect(),
            cursor: 1,
        }
    }

    /// Smallest positive index not yet used. The returned index is marked used.
    pub fn next_free(&mut self) -> u64 {
        let mut candidate = self.cursor.max(1);
        while self.used.contains(&candidate) {
            candidate += 1;
        }
        self.used.insert(candidate);
        // Everything below the cursor is taken; indices are never released.
        self.cursor = candidate + 1;
        candidate
    }

    pub fn used(&self) -> &NumberedSet {
        &self.used
    }
}
