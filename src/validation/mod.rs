pub mod descriptor_validator;
pub mod schema_validator;

pub use descriptor_validator::*;
pub use schema_validator::*;
