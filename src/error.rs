//! Error taxonomy for the particle-field engine.
//!
//! Every fatal condition carries the rank that raised it, and failures while
//! advancing the system are wrapped in [`HpfError::Step`] so the offending
//! step index is never lost.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HpfError {
    /// Missing or inconsistent parameters, reported before stepping starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// A particle reached the field engine outside `[0, L)`.
    #[error(
        "rank {rank}: particle {index} is outside the box on axis {axis} (x = {value}, L = {length})"
    )]
    DomainViolation {
        rank: usize,
        axis: usize,
        index: usize,
        value: f64,
        length: f64,
    },

    /// Positions or velocities became non-finite.
    #[error("rank {rank}: non-finite positions or velocities at step {step}")]
    NumericalDivergence { rank: usize, step: usize },

    /// A collective exchange or reduction could not complete.
    #[error("rank {rank}: collective operation failed: {reason}")]
    Collective { rank: usize, reason: String },

    #[error("rank {rank} failed at step {step}: {source}")]
    Step {
        rank: usize,
        step: usize,
        #[source]
        source: Box<HpfError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yml::Error),
}

impl HpfError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        HpfError::Config(msg.into())
    }

    /// True for errors that only echo a failure raised on another rank.
    pub fn is_collective(&self) -> bool {
        match self {
            HpfError::Collective { .. } => true,
            HpfError::Step { source, .. } => source.is_collective(),
            _ => false,
        }
    }

    /// Attach the step index to an error raised while advancing the system.
    pub(crate) fn at_step(self, rank: usize, step: usize) -> Self {
        match self {
            err @ HpfError::Step { .. } | err @ HpfError::NumericalDivergence { .. } => err,
            err => HpfError::Step {
                rank,
                step,
                source: Box::new(err),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, HpfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_wrapper_reports_rank_and_step() {
        let err = HpfError::DomainViolation {
            rank: 1,
            axis: 2,
            index: 7,
            value: 4.5,
            length: 4.0,
        }
        .at_step(1, 42);
        let msg = err.to_string();
        assert!(msg.contains("rank 1 failed at step 42"));
        assert!(msg.contains("axis 2"));
    }

    #[test]
    fn divergence_is_not_rewrapped() {
        let err = HpfError::NumericalDivergence { rank: 0, step: 9 }.at_step(0, 10);
        assert!(matches!(err, HpfError::NumericalDivergence { step: 9, .. }));
    }

    #[test]
    fn collective_detection_sees_through_step() {
        let err = HpfError::Collective {
            rank: 3,
            reason: "aborted".into(),
        }
        .at_step(3, 1);
        assert!(err.is_collective());
        assert!(!HpfError::config("bad").is_collective());
    }
}
