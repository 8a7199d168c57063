//! Configuration validation support.

use crate::error::{ConfigError, Result, ValidationError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Decides whether a candidate value may replace the current one.
///
/// `old` is `None` until the store has accepted its first value. Validators
/// run on the writer's thread before any mutation, so they must be fast and
/// free of side effects.
///
/// Any `Fn(Option<&T>, &T) -> Result<(), ValidationError>` closure is a
/// validator.
///
/// # Examples
///
/// ```rust
/// use hotstore::core::Validator;
/// use hotstore::error::ValidationError;
///
/// #[derive(Debug, Clone, Default)]
/// struct ServerConfig {
///     port: u16,
/// }
///
/// let no_privileged_ports = |_old: Option<&ServerConfig>, new: &ServerConfig| {
///     if new.port < 1024 {
///         return Err(ValidationError::invalid_field("port", "must be >= 1024"));
///     }
///     Ok(())
/// };
///
/// assert!(no_privileged_ports.validate(None, &ServerConfig { port: 80 }).is_err());
/// assert!(no_privileged_ports.validate(None, &ServerConfig { port: 8080 }).is_ok());
/// ```
pub trait Validator<T>: Send + Sync {
    /// Validate `candidate` against the currently published value.
    fn validate(&self, old: Option<&T>, candidate: &T) -> std::result::Result<(), ValidationError>;
}

impl<T, F> Validator<T> for F
where
    F: Fn(Option<&T>, &T) -> std::result::Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, old: Option<&T>, candidate: &T) -> std::result::Result<(), ValidationError> {
        self(old, candidate)
    }
}

/// Trait for configuration types that can check themselves.
///
/// Enable it on a store with
/// [`ConfigStoreBuilder::with_self_validation`](crate::core::ConfigStoreBuilder::with_self_validation).
///
/// # Examples
///
/// ```rust
/// use hotstore::core::Validate;
/// use hotstore::error::ValidationError;
///
/// #[derive(Debug, Clone, Default)]
/// struct PoolConfig {
///     max_connections: usize,
/// }
///
/// impl Validate for PoolConfig {
///     fn validate(&self) -> Result<(), ValidationError> {
///         if self.max_connections == 0 {
///             return Err(ValidationError::invalid_field(
///                 "max_connections",
///                 "must be greater than 0",
///             ));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Validate {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Should return a `ValidationError` describing what validation failed.
    fn validate(&self) -> std::result::Result<(), ValidationError>;
}

/// Adapts a [`Validate`] type into a [`Validator`] that ignores the old value.
pub(crate) struct SelfValidator;

impl<T: Validate> Validator<T> for SelfValidator {
    fn validate(&self, _old: Option<&T>, candidate: &T) -> std::result::Result<(), ValidationError> {
        candidate.validate()
    }
}

/// Validator that may await, e.g. to consult another service.
///
/// Runs before the synchronous validator when a value is proposed through
/// [`ConfigStore::propose_update_async`](crate::core::ConfigStore::propose_update_async)
/// or arrives from a source. Each attempt is bounded by
/// [`ValidationOptions::timeout`].
#[async_trait]
pub trait AsyncValidator<T>: Send + Sync {
    /// Validate `candidate` against the currently published value.
    async fn validate(
        &self,
        old: Option<&T>,
        candidate: &T,
    ) -> std::result::Result<(), ValidationError>;
}

/// Timeout and retry policy for [`AsyncValidator`] calls.
///
/// Only timeouts are retried; a returned `ValidationError` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Upper bound on a single attempt.
    pub timeout: Duration,
    /// Additional attempts after a timeout.
    pub retry_count: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Run an async validator under `options`.
///
/// The outer `Result` fails only when every attempt timed out; the inner one
/// carries the validator's verdict.
pub(crate) async fn run_async_validator<T: Sync>(
    validator: &dyn AsyncValidator<T>,
    old: Option<&T>,
    candidate: &T,
    options: &ValidationOptions,
) -> Result<std::result::Result<(), ValidationError>> {
    let attempts = options.retry_count.saturating_add(1);

    for attempt in 1..=attempts {
        match tokio::time::timeout(options.timeout, validator.validate(old, candidate)).await {
            Ok(verdict) => return Ok(verdict),
            Err(_) => {
                warn!(attempt, attempts, "async validation timed out");
                if attempt < attempts {
                    tokio::time::sleep(options.retry_delay).await;
                }
            }
        }
    }

    Err(ConfigError::ValidationTimeout { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Positive;

    impl Validate for i32 {
        fn validate(&self) -> std::result::Result<(), ValidationError> {
            if *self > 0 {
                Ok(())
            } else {
                Err(ValidationError::custom("must be positive"))
            }
        }
    }

    #[async_trait]
    impl AsyncValidator<i32> for Positive {
        async fn validate(
            &self,
            _old: Option<&i32>,
            candidate: &i32,
        ) -> std::result::Result<(), ValidationError> {
            Validate::validate(candidate)
        }
    }

    struct Sleepy {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AsyncValidator<i32> for Sleepy {
        async fn validate(
            &self,
            _old: Option<&i32>,
            _candidate: &i32,
        ) -> std::result::Result<(), ValidationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[test]
    fn test_closure_validator_sees_old_value() {
        let grows_only = |old: Option<&i32>, new: &i32| match old {
            Some(old) if new < old => Err(ValidationError::custom("must not shrink")),
            _ => Ok(()),
        };

        assert!(grows_only.validate(None, &1).is_ok());
        assert!(grows_only.validate(Some(&5), &6).is_ok());
        assert!(grows_only.validate(Some(&5), &4).is_err());
    }

    #[test]
    fn test_self_validator() {
        assert!(Validator::<i32>::validate(&SelfValidator, None, &3).is_ok());
        assert!(Validator::<i32>::validate(&SelfValidator, Some(&3), &-1).is_err());
    }

    #[tokio::test]
    async fn test_async_verdict_is_returned() {
        let options = ValidationOptions::default();
        let ok = run_async_validator(&Positive, None, &1, &options).await.unwrap();
        assert!(ok.is_ok());

        let rejected = run_async_validator(&Positive, None, &-1, &options)
            .await
            .unwrap();
        assert!(rejected.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_timeout_retries_then_fails() {
        let validator = Sleepy {
            calls: AtomicU32::new(0),
        };
        let options = ValidationOptions {
            timeout: Duration::from_millis(10),
            retry_count: 2,
            retry_delay: Duration::from_millis(5),
        };

        let result = run_async_validator(&validator, None, &1, &options).await;
        assert!(matches!(
            result,
            Err(ConfigError::ValidationTimeout { attempts: 3 })
        ));
        assert_eq!(validator.calls.load(Ordering::SeqCst), 3);
    }
}
