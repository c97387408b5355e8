pub mod file;

pub use file::{FileCache, FileCachePlatform};
