//! Composition requests, plans and materialized weights.
//!
//! A [`CompositionRequest`] names the context of one inference call. The
//! planner turns it into a [`CompositionPlan`], a deterministic value object
//! whose [`Fingerprint`] keys the cache of [`ComposedWeights`].

pub mod error;
pub mod plan;
pub mod request;
pub mod strategy;
pub mod weights;

pub use error::{CacheError, ExhaustionReason, PlanningError};
pub use plan::{CompositionPlan, Fingerprint};
pub use request::CompositionRequest;
pub use strategy::{CompositionPattern, CompositionStrategy};
pub use weights::{ComposedLayer, ComposedWeights};
