//! Concrete backends for tabsync: an HTTP remote store adapter and a
//! directory-backed shared cache.

pub mod cache;
pub mod factory;
pub mod remote;

pub use factory::PluginBackendFactory;
