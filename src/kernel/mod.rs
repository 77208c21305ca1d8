//! Convolution tree kernels over labeled ordered trees.
//!
//! Implements the Partial Tree Kernel [1] and its similarity-smoothed
//! variant [2]. Both count weighted common tree fragments, where child
//! subsequences may skip siblings at a gap penalty.
//!
//! [1] A. Moschitti. Efficient Convolution Kernels for Dependency and
//!     Constituent Syntactic Trees. ECML. 2006.
//! [2] D. Croce, A. Moschitti and R. Basili. Structured Lexical
//!     Similarity via Convolution Kernels on Dependency Trees. EMNLP. 2011.

use thiserror::Error;

pub mod buffers;
pub mod cache;
pub mod ptk;
pub mod sptk;

#[derive(Error, Debug)]
pub enum KernelConfigError {
    #[error("decay factor {name} must be in (0, 1], got {value}")]
    DecayOutOfRange { name: &'static str, value: f32 },
    #[error("terminal factor must be positive, got {}", .0)]
    NonPositiveTerminalFactor(f32),
    #[error("max subsequence length of zero would make every kernel value zero")]
    ZeroSubsequenceLength,
    #[error("similarity threshold must be in [0, 1], got {}", .0)]
    ThresholdOutOfRange(f32),
    #[error("similarity score must be in [0, 1], got {score} for label pair ({l1}, {l2})")]
    SimilarityOutOfRange {
        score: f32,
        l1: crate::parsing::LabelId,
        l2: crate::parsing::LabelId,
    },
}

/// Decay and cutoff configuration shared by both kernel variants.
/// Values are validated once at construction; evaluators treat them
/// as immutable afterwards.
#[derive(Debug, Clone, Copy)]
pub struct KernelParams {
    /// Horizontal decay, penalizes gaps in child subsequences
    pub lambda: f32,
    /// lambda * lambda, precomputed since the recurrence uses it per cell
    pub lambda_sq: f32,
    /// Vertical decay, penalizes fragment depth
    pub mu: f32,
    /// Scaling applied to leaf node matches
    pub terminal_factor: f32,
    /// Longest aligned child subsequence considered, `None` = unbounded
    pub max_subsequence_length: Option<usize>,
}

impl KernelParams {
    pub fn new(lambda: f32, mu: f32) -> Result<Self, KernelConfigError> {
        if !(lambda > 0.0 && lambda <= 1.0) {
            return Err(KernelConfigError::DecayOutOfRange {
                name: "lambda",
                value: lambda,
            });
        }
        if !(mu > 0.0 && mu <= 1.0) {
            return Err(KernelConfigError::DecayOutOfRange {
                name: "mu",
                value: mu,
            });
        }
        Ok(Self {
            lambda,
            lambda_sq: lambda * lambda,
            mu,
            terminal_factor: 1.0,
            max_subsequence_length: None,
        })
    }

    pub fn with_terminal_factor(mut self, factor: f32) -> Result<Self, KernelConfigError> {
        if !(factor > 0.0) {
            return Err(KernelConfigError::NonPositiveTerminalFactor(factor));
        }
        self.terminal_factor = factor;
        Ok(self)
    }

    pub fn with_max_subsequence_length(
        mut self,
        cutoff: usize,
    ) -> Result<Self, KernelConfigError> {
        if cutoff == 0 {
            return Err(KernelConfigError::ZeroSubsequenceLength);
        }
        self.max_subsequence_length = Some(cutoff);
        Ok(self)
    }
}

impl Default for KernelParams {
    fn default() -> Self {
        Self::new(0.4, 0.4).unwrap()
    }
}
