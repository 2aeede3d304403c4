pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod storage;
pub mod telemetry;

pub use config::{RegistryConfig, StatsConfig};
pub use error::{RegistryError, Result};
pub use registry::{Upserted, UserParams, UserRecord, UserRegistry};
pub use server::RegistryServer;
