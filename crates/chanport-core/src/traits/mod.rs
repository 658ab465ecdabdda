//! Trait seams to the external collaborators.

pub mod source;
pub mod store;
pub mod transform;

pub use source::ContentSource;
pub use store::DocumentStore;
pub use transform::{PassthroughPipeline, TransformOutcome, TransformPipeline};
