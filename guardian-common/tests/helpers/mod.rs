pub mod fixtures;
pub mod mock_source;
pub mod vaa_builder;

pub use fixtures::*;
pub use mock_source::*;
pub use vaa_builder::*;
