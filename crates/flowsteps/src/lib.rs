//! Standard step library
//!
//! Reusable units of work: closure adapters, state logging, delays and a
//! threshold router.

mod debug;
mod func;
mod route;
mod time;

pub use debug::LogStateStep;
pub use func::{router_fn, step_fn, FnRouter, FnStep};
pub use route::ThresholdRouter;
pub use time::DelayStep;
