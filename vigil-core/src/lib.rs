//! Vigil Core
//!
//! Core library for a declarative infrastructure tool: the resource model,
//! attribute schemas, the provider contract and the plan that reconciles
//! declared resources with what the provider reports.

pub mod differ;
pub mod effect;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
