pub mod request;

pub use request::{GenerationRequest, GenerationInput, GenerationOptions};
