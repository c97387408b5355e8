pub mod http;

pub use http::{HttpConnector, HttpDocumentStore};
