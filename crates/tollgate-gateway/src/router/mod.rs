//! Router module.

mod prefix;

pub use prefix::PrefixRouter;
