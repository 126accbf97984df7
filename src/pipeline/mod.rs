//! Pipeline module - blind, time-based and Strapi extraction runs.

mod blind;
mod campaign;
mod settings;
mod timing;

pub use blind::*;
pub use campaign::*;
pub use settings::*;
pub use timing::*;
