//! Small shared helpers: display formatting and in-flight flags.

pub mod flag;
pub mod format;

pub use flag::{InFlightFlag, InFlightGuard, OwnedInFlightGuard};
pub use format::{format_age, truncate_string};
