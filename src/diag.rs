/// Log target for everything the engine emits.
pub const TARGET: &str = "tick_ws";

/// Emits through `log` only when `$filter` (a `log::LevelFilter`) admits the
/// level. The filter comes from `ClientConfig::log_level`, so diagnostics can
/// be silenced per engine without touching the global logger.
macro_rules! diag {
    ($filter:expr, $lvl:ident, $($arg:tt)+) => {
        if ::log::Level::$lvl <= $filter {
            ::log::log!(target: $crate::diag::TARGET, ::log::Level::$lvl, $($arg)+);
        }
    };
}

pub(crate) use diag;
