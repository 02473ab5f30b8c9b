pub mod builtin;
pub mod datasource;
pub mod registry;

pub use builtin::OperatorDeps;
pub use datasource::SqliteExecutor;
pub use registry::{OperatorRegistry, OperatorRegistryBuilder, OperatorSpec};
