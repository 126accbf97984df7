//! Pool module - bounded probe dispatch.

mod dispatcher;

pub use dispatcher::*;
