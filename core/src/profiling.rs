//! Profiling support via Tracy.
//!
//! Optional instrumentation using the [Tracy profiler](https://github.com/wolfpld/tracy),
//! enabled with the `profiling` Cargo feature:
//!
//! ```toml
//! [dependencies]
//! redlilium-core = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! The scheduler names its worker threads with [`set_thread_name!`] and wraps
//! every executed task in a [`profile_scope_dynamic!`] span, so a Tracy
//! capture shows one lane per worker with the task names on it. The resource
//! manager plots the loading queue length once per frame with
//! [`profile_plot!`].
//!
//! ```ignore
//! use redlilium_core::profiling::{frame_mark, profile_scope};
//!
//! loop {
//!     {
//!         profile_scope!("update");
//!         // ... frame work ...
//!     }
//!     frame_mark!();
//! }
//! ```
//!
//! When profiling is disabled (the default), all macros compile to no-ops with
//! zero runtime overhead.

// Re-export tracy-client types when profiling is enabled
#[cfg(feature = "profiling")]
pub use tracy_client::{
    self, Client, PlotName, Span, frame_mark as tracy_frame_mark, plot as tracy_plot, span,
};

/// Mark the end of a frame for Tracy's frame analysis.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! frame_mark {
    () => {
        $crate::profiling::tracy_frame_mark()
    };
}

/// Mark the end of a frame (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! frame_mark {
    () => {};
}

/// Create a profiling span for the current scope.
///
/// The span automatically ends when the scope exits.
///
/// ```ignore
/// fn update_loading_deadlines() {
///     profile_scope!("update_loading_deadlines");
///     // ...
/// }
/// ```
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

/// Create a profiling span (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Plot a value over time in Tracy.
///
/// ```ignore
/// profile_plot!("loading_queue_len", queue.len());
/// ```
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        $crate::profiling::tracy_plot!($name, $value as f64)
    };
}

/// Plot a value (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        let _ = $value; // Avoid unused warnings
    };
}

/// Set the name of the current thread for Tracy.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! set_thread_name {
    ($name:expr) => {
        if let Some(client) = $crate::profiling::Client::running() {
            client.set_thread_name($name);
        }
    };
}

/// Set thread name (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! set_thread_name {
    ($name:expr) => {
        let _ = $name;
    };
}

/// Send a message to Tracy's message log.
///
/// Messages appear in Tracy's "Messages" view. The resource manager uses it
/// for reload and shutdown events.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_message {
    ($msg:expr) => {
        if let Some(client) = $crate::profiling::Client::running() {
            client.message($msg, 0);
        }
    };
}

/// Send a message (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_message {
    ($msg:expr) => {
        let _ = $msg;
    };
}

/// Create a profiling span with a runtime-determined name.
///
/// Unlike [`profile_scope!`] which requires a string literal, this macro
/// accepts any `&str` expression. It uses `tracy_client::Client::span_alloc`
/// which heap-allocates the span name. Prefer [`profile_scope!`] for static
/// names.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope_dynamic {
    ($name:expr) => {
        let _profile_span = $crate::profiling::Client::running()
            .map(|c| c.span_alloc(Some($name), "", file!(), line!(), 0));
    };
}

/// Create a profiling span with a dynamic name (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope_dynamic {
    ($name:expr) => {
        let _ = $name;
    };
}

// Re-export macros at module level
pub use frame_mark;
pub use profile_message;
pub use profile_plot;
pub use profile_scope;
pub use profile_scope_dynamic;
pub use set_thread_name;

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_compile() {
        // These should compile regardless of profiling feature
        frame_mark!();
        profile_scope!("test_scope");
        profile_scope_dynamic!("dynamic_scope");
        profile_plot!("test_value", 42.0);
        set_thread_name!("test_thread");
        profile_message!("test message");
    }
}
