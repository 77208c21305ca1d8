/// Scratch matrices for one recursion level of the child-sequence kernel:
/// the gap-weighted DP table, the common-subsequence accumulator and the
/// per-length kernel contributions. `dp` and `dps` are flat row-major
/// `width * width` matrices.
#[derive(Debug, Default)]
pub struct LevelBuffers {
    pub dp: Vec<f32>,
    pub dps: Vec<f32>,
    pub by_length: Vec<f32>,
}

impl LevelBuffers {
    fn with_width(width: usize) -> Self {
        Self {
            dp: vec![0.0; width * width],
            dps: vec![0.0; width * width],
            by_length: vec![0.0; width],
        }
    }

    fn grow(&mut self, width: usize) {
        self.dp.resize(width * width, 0.0);
        self.dps.resize(width * width, 0.0);
        self.by_length.resize(width, 0.0);
    }
}

/// Reusable scratch space for the child-sequence kernel, one
/// [`LevelBuffers`] per recursion level so nested calls never alias
/// each other's rows.
///
/// Capacity only ever grows; [`ScratchBuffers::ensure_capacity`] must run
/// before each evaluation, sized to the taller tree's height and the wider
/// tree's branching factor. Running out of levels mid-recursion is an
/// engine bug and fails loudly.
#[derive(Debug, Default)]
pub struct ScratchBuffers {
    width: usize,
    levels: Vec<LevelBuffers>,
    depth: usize,
}

impl ScratchBuffers {
    /// Grows (never shrinks) to hold `levels` recursion levels of
    /// `(branching + 1) x (branching + 1)` matrices.
    pub fn ensure_capacity(&mut self, levels: usize, branching: usize) {
        let width = branching + 1;
        if width > self.width {
            self.width = width;
            for level in &mut self.levels {
                level.grow(width);
            }
        }
        while self.levels.len() < levels {
            self.levels.push(LevelBuffers::with_width(self.width));
        }
    }

    /// Matrix row stride at the current capacity
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Takes ownership of the current level's matrices and descends one
    /// level. Every `enter` must be paired with a [`ScratchBuffers::leave`].
    pub fn enter(&mut self) -> LevelBuffers {
        assert!(
            self.depth < self.levels.len(),
            "scratch buffer capacity violated: recursion depth {} with {} allocated levels",
            self.depth,
            self.levels.len(),
        );
        let level = std::mem::take(&mut self.levels[self.depth]);
        self.depth += 1;
        level
    }

    /// Returns a level taken by [`ScratchBuffers::enter`] and ascends.
    pub fn leave(&mut self, level: LevelBuffers) {
        self.depth -= 1;
        self.levels[self.depth] = level;
    }
}
