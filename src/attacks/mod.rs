//! Target-specific attacks.
//!
//! Each attack implements the oracle contracts for one ORM or framework;
//! [`build`] selects it from the `[attack]` section.

mod django;
mod json_blind;
mod prisma;
mod strapi;
mod template;

pub use django::*;
pub use json_blind::*;
pub use prisma::*;
pub use strapi::*;
pub use template::*;

use crate::client::HttpTarget;
use crate::models::{AttackConfig, Result};
use crate::oracle::{BooleanOracle, TimingOracle};
use std::sync::Arc;

/// A configured attack, ready to run.
pub enum AttackPlan {
    /// Character search reading hits from responses
    Blind(Arc<dyn BooleanOracle>),
    /// Character search measuring processing times
    Timing(Arc<dyn TimingOracle>),
    /// Strapi account dump (one blind search per field and account)
    Strapi(StrapiTarget),
}

impl std::fmt::Debug for AttackPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blind(oracle) => f.debug_tuple("Blind").field(&oracle.name()).finish(),
            Self::Timing(oracle) => f.debug_tuple("Timing").field(&oracle.name()).finish(),
            Self::Strapi(target) => f.debug_tuple("Strapi").field(&target.url()).finish(),
        }
    }
}

/// Build the attack described by `config` against `target`.
///
/// Templates are validated here, before any request is sent.
pub fn build(config: &AttackConfig, target: Arc<HttpTarget>) -> Result<AttackPlan> {
    let plan = match config {
        AttackConfig::JsonBlind(c) => AttackPlan::Blind(Arc::new(JsonBlindOracle::new(c, target)?)),
        AttackConfig::PrismaContains(c) => {
            AttackPlan::Timing(Arc::new(PrismaContainsOracle::new(c, target)?))
        }
        AttackConfig::DjangoFilter(c) => AttackPlan::Timing(Arc::new(DjangoFilterOracle::new(c, target))),
        AttackConfig::Strapi(c) => AttackPlan::Strapi(StrapiTarget::new(c, target)),
    };
    Ok(plan)
}
