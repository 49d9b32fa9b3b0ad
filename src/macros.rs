//! Timing log macros
//!
//! Used around the expensive reconciliation steps (snapshot load, root
//! listing, duplicate grouping). Active in debug builds only.

/// Performance debug logging - only active in debug builds
#[cfg(debug_assertions)]
#[macro_export]
macro_rules! perf_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}

/// Performance debug logging - no-op in release builds
#[cfg(not(debug_assertions))]
#[macro_export]
macro_rules! perf_debug {
    ($($arg:tt)*) => {};
}

/// Evaluate an expression and log how long it took
#[macro_export]
macro_rules! timed {
    ($label:expr, $body:expr) => {{
        let started = std::time::Instant::now();
        let value = $body;
        let elapsed = started.elapsed();
        $crate::perf_debug!("{} took {:?}", $label, elapsed);
        let _ = elapsed;
        value
    }};
}
