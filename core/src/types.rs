//! Shared primitive types used across the entire pipeline.

/// An index period. Ordinal count of frequency units (see `period::Frequency`).
pub type Period = i32;

/// Identifier of a property (the unit repeat sales are matched on).
pub type PropertyId = String;

/// Identifier of an indivisible geography unit (a census tract).
pub type TractId = String;

/// Identifier of a higher-level geography an index is published for.
pub type GeographyId = String;

/// Identifier of a supertract. Sorted member tract ids joined by `+`.
pub type SupertractId = String;

/// The canonical run identifier.
pub type RunId = String;

/// Value every index series equals at its base period.
pub const BASE_INDEX_VALUE: f64 = 100.0;
