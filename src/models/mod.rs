pub mod connection;
pub mod query;
pub mod resource;
pub mod result_set;

pub use connection::*;
pub use query::*;
pub use resource::*;
pub use result_set::*;
