//! Panic-to-error guards.
//!
//! Every unit of work the engine spawns (resolving a dependency, applying
//! an action, collecting plugin resources) runs inside one of these
//! guards. A panic is caught and returned as [`OrchestratorError::Panic`]
//! carrying the payload and the stack trace captured at the panic site.

use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

static HOOK: Once = Once::new();

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Installs the process-wide panic hook that records backtraces.
///
/// Safe to call many times; only the first call installs the hook. The
/// previously installed hook still runs afterwards.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            debug!("Recovering panic: {}", info);
            previous(info);
        }));
    });
}

/// Runs a closure, converting a panic into an error.
///
/// # Errors
///
/// Returns the closure's error, or [`OrchestratorError::Panic`] if it
/// panicked.
pub fn guarded_sync<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    install_panic_hook();
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(panic_error(&*payload)))
}

/// Awaits a future, converting a panic during any poll into an error.
///
/// # Errors
///
/// Returns the future's error, or [`OrchestratorError::Panic`] if it
/// panicked.
pub async fn guarded<T, F>(future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    install_panic_hook();
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panic_error(&*payload)))
}

/// Builds a panic error from a payload and the recorded backtrace.
#[must_use]
pub fn panic_error(payload: &(dyn Any + Send)) -> OrchestratorError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("unknown panic payload"));
    let backtrace = LAST_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| String::from("<no backtrace captured>"));

    OrchestratorError::Panic { message, backtrace }
}
