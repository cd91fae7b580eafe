pub mod decoder;
pub mod policy;

pub use decoder::DecoderConfig;
pub use policy::SelectionPolicy;
