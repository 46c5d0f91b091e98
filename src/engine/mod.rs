//! Core engine: the concurrent screening run and the cross-sectional
//! normalization pass that follows it.

pub mod normalizer;
pub mod screener;
