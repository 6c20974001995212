pub mod projection_host;

pub use projection_host::{HostHandle, ProjectionHost, ProjectionUpdater};
