#![deny(missing_docs)]
//! Shared logging utilities for the archiver workspace.
//!
//! This crate provides the `engine_*` logging macros used across the codebase,
//! a per-thread export job tag, and a minimal test initializer for the global logger.
//!
//! The tag lives in a thread-local, so async jobs carry it with
//! [`with_job_context`], which installs it around every poll. That keeps the tag
//! on the right job when a multi-threaded runtime moves the task between workers.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

thread_local! {
    /// Thread-local storage for the export job currently driven on this thread.
    static JOB_CONTEXT: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Tags the current thread with the export job it is running.
/// Called by the orchestrator when a job starts.
pub fn set_job_context(job_id: u64) {
    JOB_CONTEXT.with(|v| v.set(Some(job_id)));
}

/// Removes the job tag from the current thread.
pub fn clear_job_context() {
    JOB_CONTEXT.with(|v| v.set(None));
}

/// Retrieves the export job tag for the current thread, if any.
pub fn job_context() -> Option<u64> {
    JOB_CONTEXT.with(|v| v.get())
}

/// Future returned by [`with_job_context`].
#[must_use = "futures do nothing unless polled"]
pub struct WithJobContext<F> {
    job_id: u64,
    inner: Pin<Box<F>>,
}

/// Runs `future` with the job tag set during each poll, restoring the
/// previous tag of the polling thread afterwards.
pub fn with_job_context<F: Future>(job_id: u64, future: F) -> WithJobContext<F> {
    WithJobContext {
        job_id,
        inner: Box::pin(future),
    }
}

impl<F: Future> Future for WithJobContext<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let previous = JOB_CONTEXT.with(|v| v.replace(Some(this.job_id)));
        let result = this.inner.as_mut().poll(cx);
        JOB_CONTEXT.with(|v| v.set(previous));
        result
    }
}

/// Renders the `[job N] ` prefix for the current thread, or an empty string.
#[doc(hidden)]
pub fn job_prefix() -> String {
    match job_context() {
        Some(job_id) => format!("[job {job_id}] "),
        None => String::new(),
    }
}

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! engine_trace {
    ($($arg:tt)*) => {{
        log::trace!("{}{}", $crate::job_prefix(), format_args!($($arg)*));
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {{
        log::info!("{}{}", $crate::job_prefix(), format_args!($($arg)*));
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! engine_debug {
    ($($arg:tt)*) => {{
        log::debug!("{}{}", $crate::job_prefix(), format_args!($($arg)*));
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {{
        log::warn!("{}{}", $crate::job_prefix(), format_args!($($arg)*));
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {{
        log::error!("{}{}", $crate::job_prefix(), format_args!($($arg)*));
    }};
}

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}
