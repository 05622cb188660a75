use std::result;
use std::sync::{PoisonError, RwLock};

use once_cell::sync::Lazy;
use opentelemetry::otel_warn;
use thiserror::Error;

/// A specialized `Result` type for metric operations.
pub type MetricResult<T> = result::Result<T, MetricError>;

/// Errors surfaced by the engine.
///
/// None of these are fatal: they are delivered through the global error
/// handler (see [`set_error_handler`]) and the offending view, measurement,
/// or observation is dropped while the engine keeps operating.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetricError {
    /// Two views for the same reader produced the same output name.
    #[error("duplicate view name registered: {0}")]
    CompileConflict(String),
    /// A measurement was outside the instrument's numeric domain.
    #[error("invalid observation: {0}")]
    InvalidObservation(String),
    /// An asynchronous observation was made outside of a running callback,
    /// or for an instrument the callback did not declare.
    #[error("observation scope violation: {0}")]
    ScopeViolation(String),
    /// An instrument was registered with a provider that did not create it.
    #[error("instrument does not belong to this provider: {0}")]
    ProviderMismatch(String),
    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Other errors not covered by specific cases.
    #[error("metrics error: {0}")]
    Other(String),
}

impl<T> From<PoisonError<T>> for MetricError {
    fn from(err: PoisonError<T>) -> Self {
        MetricError::Other(err.to_string())
    }
}

struct ErrorHandler(Box<dyn Fn(MetricError) + Send + Sync>);

/// The global error handler.
static GLOBAL_ERROR_HANDLER: Lazy<RwLock<Option<ErrorHandler>>> = Lazy::new(|| RwLock::new(None));

/// Handle an error using the globally configured error handler.
///
/// Logs a warning if no handler is set.
pub fn handle_error<T: Into<MetricError>>(err: T) {
    let err = err.into();
    match GLOBAL_ERROR_HANDLER.read() {
        Ok(handler) if handler.is_some() => (handler.as_ref().unwrap().0)(err),
        _ => {
            otel_warn!(name: "MetricError", error = format!("{err}"));
        }
    }
}

/// Set the global error handler.
pub fn set_error_handler<F>(f: F) -> MetricResult<()>
where
    F: Fn(MetricError) + Send + Sync + 'static,
{
    GLOBAL_ERROR_HANDLER
        .write()
        .map(|mut handler| *handler = Some(ErrorHandler(Box::new(f))))
        .map_err(Into::into)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex, MutexGuard};

    // The error handler is process-global; tests that install one take this
    // guard so they do not trample each other.
    static HANDLER_LOCK: Mutex<()> = Mutex::new(());

    /// Installs a capturing error handler for the duration of the guard.
    pub(crate) struct CapturedErrors {
        errors: Arc<Mutex<Vec<MetricError>>>,
        _guard: MutexGuard<'static, ()>,
    }

    impl CapturedErrors {
        pub(crate) fn install() -> Self {
            let guard = HANDLER_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            let errors: Arc<Mutex<Vec<MetricError>>> = Arc::new(Mutex::new(vec![]));
            let sink = Arc::clone(&errors);
            set_error_handler(move |err| {
                sink.lock().unwrap_or_else(PoisonError::into_inner).push(err);
            })
            .expect("error handler can be set");
            CapturedErrors {
                errors,
                _guard: guard,
            }
        }

        pub(crate) fn take(&self) -> Vec<MetricError> {
            let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *errors)
        }
    }

    impl Drop for CapturedErrors {
        fn drop(&mut self) {
            let _ = GLOBAL_ERROR_HANDLER
                .write()
                .map(|mut handler| *handler = None);
        }
    }

    #[test]
    fn handler_receives_reported_errors() {
        let captured = CapturedErrors::install();
        handle_error(MetricError::Other("boom".into()));

        let errs = captured.take();
        assert_eq!(errs.len(), 1);
        assert!(matches!(errs[0], MetricError::Other(_)));
    }
}
