//! Builders to construct an intersection from configuration.

pub mod intersection_builder;

pub use intersection_builder::IntersectionBuilder;
