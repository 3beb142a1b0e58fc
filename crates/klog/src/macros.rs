//! Call-site logging macros.
//!
//! Each macro formats its arguments like [`format!`], records the call site as
//! `<file name>.<line> <module path>` and sends an application event to the
//! [global dispatcher](crate::global). A leading `priority: <expr>,` overrides
//! the level's default priority.
//!
//! ```no_run
//! klog::info!("user {} signed in", 42);
//! klog::error!(priority: klog::Priority::HIGHEST, "payment failed: {}", "timeout");
//! ```

#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    ($level:expr, $priority:expr, $($arg:tt)+) => {
        $crate::global().log(
            $level,
            $priority,
            $crate::format_origin(::std::file!(), ::std::line!(), ::std::module_path!()),
            ::std::format!($($arg)+),
        )
    };
}

/// Logs a fault, the most severe level.
#[macro_export]
macro_rules! fault {
    (priority: $priority:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Fault, $priority, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Fault, $crate::Level::Fault.default_priority(), $($arg)+)
    };
}

/// Logs an error.
#[macro_export]
macro_rules! error {
    (priority: $priority:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Error, $priority, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Error, $crate::Level::Error.default_priority(), $($arg)+)
    };
}

/// Logs a warning.
#[macro_export]
macro_rules! warn {
    (priority: $priority:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Warn, $priority, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Warn, $crate::Level::Warn.default_priority(), $($arg)+)
    };
}

/// Logs an informational event.
#[macro_export]
macro_rules! info {
    (priority: $priority:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Info, $priority, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Info, $crate::Level::Info.default_priority(), $($arg)+)
    };
}

/// Logs a debug event.
#[macro_export]
macro_rules! debug {
    (priority: $priority:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Debug, $priority, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Debug, $crate::Level::Debug.default_priority(), $($arg)+)
    };
}

/// Logs a util event, the least severe level.
#[macro_export]
macro_rules! util {
    (priority: $priority:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Util, $priority, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Util, $crate::Level::Util.default_priority(), $($arg)+)
    };
}
