pub mod profile;

pub use profile::{DetectionGenerator, GeneratorConfig};
