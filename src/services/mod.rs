pub mod api_invoker;
pub mod catalog;
pub mod connection_manager;
pub mod pagination;
pub mod query_translator;
pub mod remote; // Remote API backends (HTTP via reqwest)
pub mod resource_registry;
pub mod resource_table;

pub use api_invoker::*;
pub use catalog::*;
pub use connection_manager::*;
pub use pagination::*;
pub use query_translator::*;
pub use resource_registry::*;
pub use resource_table::*;
