//! Partial Tree Kernel with exact label matching.

use crate::indexing::KernelIndex;
use crate::kernel::buffers::ScratchBuffers;
use crate::kernel::cache::{DeltaCache, DeltaEntry};
use crate::kernel::KernelParams;

/// Evaluator for the Partial Tree Kernel.
///
/// Holds the delta cache and the scratch buffers across evaluations, so
/// one instance amortizes allocations over a whole workload. The state is
/// mutated by every call; for parallel workloads give each worker its own
/// instance.
pub struct PartialTreeKernel {
    params: KernelParams,
    cache: DeltaCache,
    buffers: ScratchBuffers,
}

impl PartialTreeKernel {
    pub fn new(params: KernelParams) -> Self {
        Self {
            params,
            cache: DeltaCache::default(),
            buffers: ScratchBuffers::default(),
        }
    }

    /// Computes the raw (unnormalized) kernel value between two trees.
    pub fn evaluate(&mut self, t1: &KernelIndex, t2: &KernelIndex) -> f32 {
        if t1.tree_size == 0 || t2.tree_size == 0 {
            return 0.0;
        }
        self.cache.clear();
        self.buffers.ensure_capacity(
            t1.height.max(t2.height),
            t1.max_degree.max(t2.max_degree),
        );

        let pairs = self.matching_node_pairs(t1, t2);
        pairs
            .into_iter()
            .map(|(n1, n2)| self.delta(t1, t2, n1, n2))
            .sum()
    }

    /// Merge-join over the label-sorted node lists of both trees.
    ///
    /// Produces exactly the node pairs with equal labels and pre-registers
    /// each of them in the delta cache, in O(|N1| + |N2| + matches).
    fn matching_node_pairs(&mut self, t1: &KernelIndex, t2: &KernelIndex) -> Vec<(usize, usize)> {
        let (sorted1, sorted2) = (&t1.nodes_by_label, &t2.nodes_by_label);
        let mut pairs = vec![];
        let (mut i, mut j) = (0, 0);
        while i < sorted1.len() && j < sorted2.len() {
            let label1 = t1.labels[sorted1[i]];
            let label2 = t2.labels[sorted2[j]];
            match label1.cmp(&label2) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    // cross product of the two runs sharing this label
                    let run1_end = run_end(sorted1, &t1.labels, i);
                    let run2_end = run_end(sorted2, &t2.labels, j);
                    for &n1 in &sorted1[i..run1_end] {
                        for &n2 in &sorted2[j..run2_end] {
                            self.cache.mark_pending(n1, n2);
                            pairs.push((n1, n2));
                        }
                    }
                    i = run1_end;
                    j = run2_end;
                }
            }
        }
        pairs
    }

    /// Weighted count of common fragments rooted at the pair `(n1, n2)`.
    fn delta(&mut self, t1: &KernelIndex, t2: &KernelIndex, n1: usize, n2: usize) -> f32 {
        match self.cache.get(n1, n2) {
            Some(DeltaEntry::Resolved(value)) => return value,
            // pre-registered by the pair generator, labels already match
            Some(DeltaEntry::Pending) => {}
            None => {
                if t1.labels[n1] != t2.labels[n2] {
                    self.cache.resolve(n1, n2, 0.0);
                    return 0.0;
                }
            }
        }

        let value = if t1.is_leaf(n1) || t2.is_leaf(n2) {
            self.params.mu * self.params.lambda_sq * self.params.terminal_factor
        } else {
            self.params.mu * (self.params.lambda_sq + self.child_sequence_kernel(t1, t2, n1, n2))
        };
        self.cache.resolve(n1, n2, value);
        value
    }

    /// Gap-weighted subsequence kernel over the two children sequences,
    /// summing contributions of common ordered subsequences per length.
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

        // length-1 subsequences
        for i in 1..=n {
            for j in 1..=m {
                if t1.labels[s1[i - 1]] == t2.labels[s2[j - 1]] {
                    let d = self.delta(t1, t2, s1[i - 1], s2[j - 1]);
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
                    // inclusion-exclusion over gapped alignments
                    level.dp[i * width + j] = level.dps[i * width + j]
                        + lambda * level.dp[(i - 1) * width + j]
                        + lambda * level.dp[i * width + (j - 1)]
                        - lambda_sq * level.dp[(i - 1) * width + (j - 1)];
                    if t1.labels[s1[i - 1]] == t2.labels[s2[j - 1]] {
                        let d = self.delta(t1, t2, s1[i - 1], s2[j - 1])
                            * level.dp[(i - 1) * width + (j - 1)];
                        level.dps[i * width + j] = d;
                        level.by_length[l] += d;
                    }
                }
            }
        }

        let sum = level.by_length[..p].iter().sum();
        self.buffers.leave(level);
        sum
    }
}

fn run_end(sorted: &[usize], labels: &[crate::parsing::LabelId], start: usize) -> usize {
    let label = labels[sorted[start]];
    let mut end = start + 1;
    while end < sorted.len() && labels[sorted[end]] == label {
        end += 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexing::Indexer;
    use crate::parsing::{parse_tree, LabelDict};
    use rand::Rng;
    use rand_xoshiro::rand_core::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    const TOLERANCE: f32 = 1e-5;

    fn index_pair(t1: &str, t2: &str) -> (KernelIndex, KernelIndex) {
        let mut ld = LabelDict::new();
        let p1 = parse_tree(t1, &mut ld).unwrap();
        let p2 = parse_tree(t2, &mut ld).unwrap();
        (
            KernelIndex::index_tree(&p1, &ld),
            KernelIndex::index_tree(&p2, &ld),
        )
    }

    fn evaluate(t1: &str, t2: &str, params: KernelParams) -> f32 {
        let (i1, i2) = index_pair(t1, t2);
        PartialTreeKernel::new(params).evaluate(&i1, &i2)
    }

    fn random_tree_str(rng: &mut Xoshiro256PlusPlus, max_depth: usize) -> String {
        const LABELS: [&str; 6] = ["S", "NP", "VP", "DT", "NN", "V"];
        let label = LABELS[rng.gen_range(0..LABELS.len())];
        if max_depth == 0 {
            return format!("{{{label}}}");
        }
        let children = rng.gen_range(0..=3);
        let mut s = format!("{{{label}");
        for _ in 0..children {
            s.push_str(&random_tree_str(rng, max_depth - 1));
        }
        s.push('}');
        s
    }

    #[test]
    fn test_leaf_pair_exact_value() {
        let kernel = evaluate("{a}", "{a}", KernelParams::new(0.4, 0.4).unwrap());
        // mu * lambda^2 * terminal_factor = 0.4 * 0.16 * 1
        assert!((kernel - 0.064).abs() < TOLERANCE, "got {kernel}");
    }

    #[test]
    fn test_no_shared_labels_is_zero() {
        let kernel = evaluate("{a{b}{c}}", "{x{y}{z}}", KernelParams::default());
        assert_eq!(kernel, 0.0);
    }

    #[test]
    fn test_empty_tree_is_zero() {
        let mut ld = LabelDict::new();
        let t = parse_tree("{a{b}}", &mut ld).unwrap();
        let idx = KernelIndex::index_tree(&t, &ld);
        let empty = KernelIndex::default();
        let mut ptk = PartialTreeKernel::new(KernelParams::default());
        assert_eq!(ptk.evaluate(&idx, &empty), 0.0);
        assert_eq!(ptk.evaluate(&empty, &empty), 0.0);
    }

    #[test]
    fn test_self_similarity_positive() {
        for tree in ["{a}", "{a{b}{c}}", "{S{NP{DT}{NN}}{VP{V}{NP{NN}}}}"] {
            let kernel = evaluate(tree, tree, KernelParams::default());
            assert!(kernel > 0.0, "K({tree}, {tree}) = {kernel}");
        }
    }

    #[test]
    fn test_cutoff_one_equals_length_one_pass() {
        // both trees have three matching children under the root, so
        // lengths 2 and 3 would contribute without the cutoff
        let t = "{a{x}{y}{z}}";
        let leaf = 0.4f32 * (0.4 * 0.4);
        let expected_root = 0.4 * (0.4 * 0.4 + 3.0 * leaf);
        let expected = expected_root + 3.0 * leaf;

        let params = KernelParams::new(0.4, 0.4)
            .unwrap()
            .with_max_subsequence_length(1)
            .unwrap();
        let bounded = evaluate(t, t, params);
        assert!((bounded - expected).abs() < TOLERANCE, "got {bounded}");

        let unbounded = evaluate(t, t, KernelParams::new(0.4, 0.4).unwrap());
        assert!(unbounded > bounded);
    }

    #[test]
    fn test_symmetry() {
        let t1 = "{S{NP{DT}{NN}}{VP{V}{NP{DT}{NN}}}}";
        let t2 = "{S{NP{NN}}{VP{V}{NP{DT}{NN}}{NP{NN}}}}";
        let params = KernelParams::default();
        let forward = evaluate(t1, t2, params);
        let backward = evaluate(t2, t1, params);
        assert!((forward - backward).abs() < TOLERANCE);
        assert!(forward > 0.0);
    }

    #[test]
    fn test_symmetry_and_nonnegativity_random() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0xF00D);
        let params = KernelParams::default();
        for _ in 0..30 {
            let s1 = random_tree_str(&mut rng, 3);
            let s2 = random_tree_str(&mut rng, 3);
            let forward = evaluate(&s1, &s2, params);
            let backward = evaluate(&s2, &s1, params);
            assert!(forward >= 0.0, "K({s1}, {s2}) = {forward}");
            let scale = forward.abs().max(1.0);
            assert!(
                (forward - backward).abs() / scale < TOLERANCE,
                "asymmetry on {s1} vs {s2}: {forward} != {backward}"
            );
        }
    }

    #[test]
    fn test_repeated_evaluation_is_idempotent() {
        let (i1, i2) = index_pair("{a{b}{c{a}}}", "{a{c{a}}{b}}");
        let mut ptk = PartialTreeKernel::new(KernelParams::default());
        let first = ptk.evaluate(&i1, &i2);
        let second = ptk.evaluate(&i1, &i2);
        assert_eq!(first, second);

        let fresh = PartialTreeKernel::new(KernelParams::default()).evaluate(&i1, &i2);
        assert_eq!(first, fresh);
    }

    #[test]
    fn test_lambda_monotonicity() {
        let t1 = "{S{NP{DT}{NN}}{VP{V}}}";
        let t2 = "{S{NP{DT}{NN}}{VP{V}{NP{NN}}}}";
        let mut previous = f32::INFINITY;
        for lambda in [0.9, 0.6, 0.3, 0.1] {
            let kernel = evaluate(t1, t2, KernelParams::new(lambda, 0.4).unwrap());
            assert!(
                kernel <= previous,
                "kernel grew when lambda shrank to {lambda}: {kernel} > {previous}"
            );
            previous = kernel;
        }
    }

    #[test]
    fn test_buffer_growth_is_transparent() {
        let mut ld = LabelDict::new();
        let small1 = parse_tree("{a{b}{c}}", &mut ld).unwrap();
        let small2 = parse_tree("{a{c}{b}}", &mut ld).unwrap();
        let large = parse_tree(
            "{a{b{c{d{e{f}{g}{h}{i}{j}}}}}{c{d}{e}{f}{g}{h}{i}{j}{b}}}",
            &mut ld,
        )
        .unwrap();

        let s1 = KernelIndex::index_tree(&small1, &ld);
        let s2 = KernelIndex::index_tree(&small2, &ld);
        let big = KernelIndex::index_tree(&large, &ld);

        let mut ptk = PartialTreeKernel::new(KernelParams::default());
        let before = ptk.evaluate(&s1, &s2);
        let _ = ptk.evaluate(&big, &big);
        let after = ptk.evaluate(&s1, &s2);
        assert_eq!(before, after, "buffer growth corrupted a later result");
    }

    #[test]
    fn test_merge_join_matches_naive_cross_product() {
        let (i1, i2) = index_pair("{a{b{a}{b}}{a}{c}}", "{b{a{a}}{c{b}{b}}}");
        let mut ptk = PartialTreeKernel::new(KernelParams::default());
        let mut pairs = ptk.matching_node_pairs(&i1, &i2);
        pairs.sort_unstable();

        let mut naive = vec![];
        for n1 in 0..i1.tree_size {
            for n2 in 0..i2.tree_size {
                if i1.labels[n1] == i2.labels[n2] {
                    naive.push((n1, n2));
                }
            }
        }
        assert_eq!(pairs, naive);
    }

    #[test]
    fn test_terminal_factor_scales_leaf_matches() {
        let params = KernelParams::new(0.4, 0.4)
            .unwrap()
            .with_terminal_factor(2.0)
            .unwrap();
        let kernel = evaluate("{a}", "{a}", params);
        assert!((kernel - 0.128).abs() < TOLERANCE);
    }
}
