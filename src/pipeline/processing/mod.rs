// Record processing: raw-to-typed normalization and feature derivation

pub mod enrich;
pub mod normalize;
