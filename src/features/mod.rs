//! Optional advanced features.

#[cfg(feature = "history")]
pub mod history;

#[cfg(feature = "history")]
pub use history::HistoryEntry;

#[cfg(feature = "gradual-rollout")]
pub mod rollout;

#[cfg(feature = "gradual-rollout")]
pub use rollout::{
    CompositeStrategy, GradualRollout, PercentageStrategy, RolloutDecision, RolloutStrategy,
    TimeBasedStrategy,
};
