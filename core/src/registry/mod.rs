pub mod handles;
pub mod service_registry;

pub use handles::ServiceHandles;
pub use service_registry::ServiceRegistry;
