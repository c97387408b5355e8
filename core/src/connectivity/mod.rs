pub mod monitor;

pub use monitor::{ConnectionMonitor, ConnectivitySource, ConnectivityTransition};
