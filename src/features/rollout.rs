//! Gradual rollout: gate proposals behind a strategy before they reach the store.
//!
//! A [`GradualRollout`] checks a candidate with its own validator, then asks
//! its [`RolloutStrategy`] whether the change should be applied now. Deferred
//! candidates leave the store untouched; the caller may retry later.

use crate::core::ConfigStore;
use crate::error::{ConfigError, Result, ValidationError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Decides whether a pending change should be applied now.
pub trait RolloutStrategy: Send + Sync {
    /// Whether to apply the change on this attempt.
    fn should_apply(&self) -> bool;
}

/// Applies a change on roughly `percentage` percent of attempts.
#[derive(Debug, Clone, Copy)]
pub struct PercentageStrategy {
    percentage: f64,
}

impl PercentageStrategy {
    /// Create a strategy; `percentage` is clamped to `0.0..=100.0`.
    pub fn new(percentage: f64) -> Self {
        Self {
            percentage: percentage.clamp(0.0, 100.0),
        }
    }

    /// The configured percentage.
    pub fn percentage(&self) -> f64 {
        self.percentage
    }
}

impl RolloutStrategy for PercentageStrategy {
    fn should_apply(&self) -> bool {
        fastrand::f64() * 100.0 < self.percentage
    }
}

/// Applies changes only once `delay` has passed since the strategy was created.
#[derive(Debug, Clone, Copy)]
pub struct TimeBasedStrategy {
    start: Instant,
    delay: Duration,
}

impl TimeBasedStrategy {
    /// Start the clock now.
    pub fn new(delay: Duration) -> Self {
        Self {
            start: Instant::now(),
            delay,
        }
    }
}

impl RolloutStrategy for TimeBasedStrategy {
    fn should_apply(&self) -> bool {
        self.start.elapsed() >= self.delay
    }
}

/// Applies a change only if every inner strategy agrees.
///
/// An empty composite always applies.
#[derive(Default)]
pub struct CompositeStrategy {
    strategies: Vec<Box<dyn RolloutStrategy>>,
}

impl CompositeStrategy {
    /// Create an empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a strategy.
    pub fn with<S: RolloutStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }
}

impl RolloutStrategy for CompositeStrategy {
    fn should_apply(&self) -> bool {
        self.strategies.iter().all(|s| s.should_apply())
    }
}

/// What happened to a candidate offered to a [`GradualRollout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutDecision {
    /// Published under this version.
    Applied(u64),
    /// Held back by the strategy.
    Deferred,
}

type CandidateCheck<T> = Box<dyn Fn(&T) -> std::result::Result<(), ValidationError> + Send + Sync>;

/// Strategy-gated proposals into a [`ConfigStore`].
///
/// # Examples
///
/// ```rust
/// use hotstore::prelude::*;
/// use hotstore::features::{CompositeStrategy, GradualRollout, PercentageStrategy, RolloutDecision};
///
/// let store: ConfigStore<u32> = ConfigStore::new();
/// let rollout = GradualRollout::new(store.clone())
///     .with_strategy(CompositeStrategy::new().with(PercentageStrategy::new(100.0)));
///
/// assert_eq!(rollout.propose(5).unwrap(), RolloutDecision::Applied(1));
/// ```
pub struct GradualRollout<T: Send + Sync + 'static> {
    store: ConfigStore<T>,
    strategy: Option<Box<dyn RolloutStrategy>>,
    validator: Option<CandidateCheck<T>>,
}

impl<T: Send + Sync + 'static> GradualRollout<T> {
    /// Create a rollout that applies every valid candidate.
    pub fn new(store: ConfigStore<T>) -> Self {
        Self {
            store,
            strategy: None,
            validator: None,
        }
    }

    /// Gate candidates behind `strategy`.
    pub fn with_strategy<S: RolloutStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategy = Some(Box::new(strategy));
        self
    }

    /// Check candidates before consulting the strategy.
    pub fn with_validation<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> std::result::Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Whether the strategy currently allows applying a change.
    pub fn should_apply(&self) -> bool {
        self.strategy.as_ref().is_none_or(|s| s.should_apply())
    }

    /// Offer a candidate.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationRejected`] if the rollout's own validator or
    /// the store's validator rejects the candidate.
    pub fn propose(&self, candidate: T) -> Result<RolloutDecision> {
        if let Some(validator) = &self.validator {
            validator(&candidate).map_err(ConfigError::ValidationRejected)?;
        }

        if !self.should_apply() {
            debug!("rollout deferred configuration update");
            return Ok(RolloutDecision::Deferred);
        }

        self.store
            .propose_update(candidate)
            .map(RolloutDecision::Applied)
    }

    /// The store this rollout feeds.
    pub fn store(&self) -> &ConfigStore<T> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Never;

    impl RolloutStrategy for Never {
        fn should_apply(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_percentage_bounds() {
        let never = PercentageStrategy::new(0.0);
        let always = PercentageStrategy::new(150.0);
        assert_eq!(always.percentage(), 100.0);

        for _ in 0..100 {
            assert!(!never.should_apply());
            assert!(always.should_apply());
        }
    }

    #[test]
    fn test_percentage_distribution() {
        let half = PercentageStrategy::new(50.0);
        let applied = (0..1000).filter(|_| half.should_apply()).count();

        // Roughly half, with room for randomness
        assert!((400..=600).contains(&applied));
    }

    #[test]
    fn test_time_based() {
        assert!(TimeBasedStrategy::new(Duration::ZERO).should_apply());
        assert!(!TimeBasedStrategy::new(Duration::from_secs(3600)).should_apply());
    }

    #[test]
    fn test_composite_requires_all() {
        assert!(CompositeStrategy::new().should_apply());

        let mixed = CompositeStrategy::new()
            .with(PercentageStrategy::new(100.0))
            .with(Never);
        assert!(!mixed.should_apply());
    }

    #[test]
    fn test_deferred_leaves_store() {
        let store: ConfigStore<i32> = ConfigStore::new();
        let rollout = GradualRollout::new(store.clone()).with_strategy(Never);

        assert_eq!(rollout.propose(1).unwrap(), RolloutDecision::Deferred);
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_applied_publishes() {
        let store: ConfigStore<i32> = ConfigStore::new();
        let rollout = GradualRollout::new(store.clone());

        assert_eq!(rollout.propose(7).unwrap(), RolloutDecision::Applied(1));
        assert_eq!(*store.get(), 7);
    }

    #[test]
    fn test_rollout_validation_runs_first() {
        let store: ConfigStore<i32> = ConfigStore::new();
        let rollout = GradualRollout::new(store.clone())
            .with_strategy(Never)
            .with_validation(|v: &i32| {
                if *v < 0 {
                    return Err(ValidationError::custom("negative"));
                }
                Ok(())
            });

        assert!(rollout.propose(-1).unwrap_err().is_rejection());
        assert_eq!(rollout.propose(1).unwrap(), RolloutDecision::Deferred);
    }
}
