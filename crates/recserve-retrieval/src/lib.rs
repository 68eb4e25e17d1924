//! Recserve Retrieval
//!
//! Query side of the control plane:
//! - [`engine`]: ranked candidates and per-user recommendations with
//!   hidden-item filtering, feedback exclusion and source fallback
//! - [`overview`]: counters, rates, categories and cluster membership
//! - [`source`]: named recommendation sources and scenarios

pub mod engine;
pub mod overview;
pub mod source;

pub use engine::{
    CandidateKind, RecommendRequest, Recommendation, RecommendedItem, Retriever, Scored,
};
pub use overview::{ModelScore, Overview, Stats, UserDetail};
pub use source::{FALLBACK_SCENARIO, RecommendSource, Scenario};
