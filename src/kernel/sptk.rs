//! Smoothed Partial Tree Kernel: exact label matching is relaxed to a
//! pluggable node similarity, so lexically different but semantically
//! close labels still produce common fragments.

use crate::indexing::KernelIndex;
use crate::kernel::buffers::ScratchBuffers;
use crate::kernel::cache::{DeltaCache, DeltaEntry};
use crate::kernel::{KernelConfigError, KernelParams};
use crate::parsing::LabelId;
use rustc_hash::FxHashMap;

/// Node similarity used in place of label equality.
///
/// Contract: scores lie in [0, 1] and `score(a, b) == score(b, a)`; an
/// asymmetric function breaks the kernel's symmetry.
pub trait NodeSimilarity {
    fn score(&self, l1: LabelId, l2: LabelId) -> f32;
}

/// Degenerate similarity: 1.0 iff the labels are equal. Makes the
/// smoothed kernel coincide with the exact-match kernel.
#[derive(Debug, Default, Clone)]
pub struct ExactMatchSimilarity;

impl NodeSimilarity for ExactMatchSimilarity {
    #[inline]
    fn score(&self, l1: LabelId, l2: LabelId) -> f32 {
        if l1 == l2 {
            1.0
        } else {
            0.0
        }
    }
}

/// Table-backed symmetric similarity, typically loaded from a word-pair
/// score file. Equal labels score 1.0, pairs missing from the table 0.0.
#[derive(Debug, Default, Clone)]
pub struct LexicalSimilarity {
    scores: FxHashMap<(LabelId, LabelId), f32>,
}

impl LexicalSimilarity {
    pub fn insert(&mut self, l1: LabelId, l2: LabelId, score: f32) -> Result<(), KernelConfigError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(KernelConfigError::SimilarityOutOfRange { score, l1, l2 });
        }
        self.scores.insert((l1.min(l2), l1.max(l2)), score);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl NodeSimilarity for LexicalSimilarity {
    #[inline]
    fn score(&self, l1: LabelId, l2: LabelId) -> f32 {
        if l1 == l2 {
            return 1.0;
        }
        self.scores
            .get(&(l1.min(l2), l1.max(l2)))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Evaluator for the Smoothed Partial Tree Kernel.
///
/// Same recursion and scratch-buffer scheme as the exact-match kernel,
/// but the delta function gates on `similarity >= threshold` and keeps
/// the similarity as a multiplicative factor. Candidate filtering happens
/// per children pair at every recursion level, so no qualifying pair is
/// dropped for lack of a top-level registration.
pub struct SmoothedPartialTreeKernel<S: NodeSimilarity> {
    params: KernelParams,
    similarity: S,
    threshold: f32,
    cache: DeltaCache,
    buffers: ScratchBuffers,
}

impl<S: NodeSimilarity> SmoothedPartialTreeKernel<S> {
    pub fn new(
        params: KernelParams,
        similarity: S,
        threshold: f32,
    ) -> Result<Self, KernelConfigError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(KernelConfigError::ThresholdOutOfRange(threshold));
        }
        Ok(Self {
            params,
            similarity,
            threshold,
            cache: DeltaCache::default(),
            buffers: ScratchBuffers::default(),
        })
    }

    /// Computes the raw (unnormalized) kernel value between two trees.
    ///
    /// The similarity function is continuous, so no sort-based join
    /// applies; every node pair is a potential candidate and the delta
    /// function resolves each to zero or a weighted fragment count.
    pub fn evaluate(&mut self, t1: &KernelIndex, t2: &KernelIndex) -> f32 {
        if t1.tree_size == 0 || t2.tree_size == 0 {
            return 0.0;
        }
        self.cache.clear();
        self.buffers.ensure_capacity(
            t1.height.max(t2.height),
            t1.max_degree.max(t2.max_degree),
        );

        let mut sum = 0.0;
        for n1 in 0..t1.tree_size {
            for n2 in 0..t2.tree_size {
                sum += self.delta(t1, t2, n1, n2);
            }
        }
        sum
    }

    fn delta(&mut self, t1: &KernelIndex, t2: &KernelIndex, n1: usize, n2: usize) -> f32 {
        match self.cache.get(n1, n2) {
            Some(DeltaEntry::Resolved(value)) => return value,
            Some(DeltaEntry::Pending) | None => {}
        }

        let sigma = self.similarity.score(t1.labels[n1], t2.labels[n2]);
        if sigma < self.threshold {
            self.cache.resolve(n1, n2, 0.0);
            return 0.0;
        }

        let value = if t1.is_leaf(n1) || t2.is_leaf(n2) {
            self.params.mu * self.params.lambda_sq * self.params.terminal_factor * sigma
        } else {
            sigma
                * self.params.mu
                * (self.params.lambda_sq + self.child_sequence_kernel(t1, t2, n1, n2))
        };
        self.cache.resolve(n1, n2, value);
        value
    }

    fn child_sequence_kernel(
        &mut self,
        t1: &KernelIndex,
        t2: &KernelIndex,
        n1: usize,
        n2: usize,
    ) -> f32 {
        let (lambda, lambda_sq) = (self.params.lambda, self.params.lambda_sq);
        let s1: &[usize] = &t1.children[n1];
        let s2: &[usize] = &t2.children[n2];
        let (n, m) = (s1.len(), s2.len());
        let mut p = n.min(m);
        if let Some(cutoff) = self.params.max_subsequence_length {
            p = p.min(cutoff);
        }

        let width = self.buffers.width();
        let mut level = self.buffers.enter();
        for i in 0..=n {
            for j in 0..=m {
                level.dp[i * width + j] = 0.0;
                level.dps[i * width + j] = 0.0;
            }
        }
        level.by_length[..p].fill(0.0);

        // length-1 subsequences; the delta call registers every child
        // pair at this recursion level and gates it by the threshold
        for i in 1..=n {
            for j in 1..=m {
                let d = self.delta(t1, t2, s1[i - 1], s2[j - 1]);
                if d != 0.0 {
                    level.dps[i * width + j] = d;
                    level.by_length[0] += d;
                }
            }
        }

        for l in 1..p {
            // boundary row and column for this length must read as zero
            for j in 0..=m {
                level.dp[(l - 1) * width + j] = 0.0;
            }
            for i in 0..=n {
                level.dp[i * width + (l - 1)] = 0.0;
            }
            for i in l..=n {
                for j in l..=m {
                    level.dp[i * width + j] = level.dps[i * width + j]
                        + lambda * level.dp[(i - 1) * width + j]
                        + lambda * level.dp[i * width + (j - 1)]
                        - lambda_sq * level.dp[(i - 1) * width + (j - 1)];
                    let d = self.delta(t1, t2, s1[i - 1], s2[j - 1]);
                    if d != 0.0 {
                        let contribution = d * level.dp[(i - 1) * width + (j - 1)];
                        level.dps[i * width + j] = contribution;
                        level.by_length[l] += contribution;
                    }
                }
            }
        }

        let sum = level.by_length[..p].iter().sum();
        self.buffers.leave(level);
        sum
    }
}
