use rustc_hash::FxHashMap;

/// State of one node pair inside the delta cache.
///
/// `Pending` means the pair was pre-registered by the candidate pair
/// generator: the label match is already established and the delta value
/// still has to be computed. Absent pairs carry no such guarantee.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaEntry {
    Pending,
    Resolved(f32),
}

/// Per-evaluation memoization of delta values, keyed by the preorder ids
/// of a node from the first tree and a node from the second tree.
///
/// Cleared at the start of every top-level evaluation, so preorder ids of
/// unrelated tree pairs can never alias each other.
#[derive(Debug, Default)]
pub struct DeltaCache {
    entries: FxHashMap<u64, DeltaEntry>,
}

#[inline(always)]
fn pair_key(n1: usize, n2: usize) -> u64 {
    debug_assert!(n1 <= u32::MAX as usize && n2 <= u32::MAX as usize);
    ((n1 as u64) << 32) | n2 as u64
}

impl DeltaCache {
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    pub fn get(&self, n1: usize, n2: usize) -> Option<DeltaEntry> {
        self.entries.get(&pair_key(n1, n2)).copied()
    }

    /// Registers a candidate pair whose value is not computed yet.
    /// A pair that already resolved keeps its value.
    #[inline]
    pub fn mark_pending(&mut self, n1: usize, n2: usize) {
        self.entries
            .entry(pair_key(n1, n2))
            .or_insert(DeltaEntry::Pending);
    }

    #[inline]
    pub fn resolve(&mut self, n1: usize, n2: usize, value: f32) {
        self.entries.insert(pair_key(n1, n2), DeltaEntry::Resolved(value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
