#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod aggregate;
pub mod detect;
pub mod llm;
pub mod markers;
pub mod metadata;
pub mod ocr;
pub mod pipeline;
pub mod text;
pub mod tiles;

pub use markers::{
    Candidate, Classification, DetectionMethod, Marker, MarkerKind, ProjectContext, ShapeKind,
};
