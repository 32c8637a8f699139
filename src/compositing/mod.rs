//! Local pixel pipeline
//!
//! Everything in this module is synchronous and deterministic: orientation
//! normalization, mask finishing, placement math, reflection synthesis and
//! final layer assembly. Remote calls live in [`crate::remote`].

pub mod assembler;
pub mod mask;
pub mod orientation;
pub mod placement;
pub mod reflection;

pub use assembler::{CompositeAssembler, DEFAULT_DEPTH_OF_FIELD_RADIUS};
pub use mask::{AlphaMasker, NEAR_BLACK_THRESHOLD};
pub use orientation::{ExifOrientation, OrientationNormalizer};
pub use placement::PlacementResolver;
pub use reflection::{ReflectionOptions, ReflectionSynthesizer};
