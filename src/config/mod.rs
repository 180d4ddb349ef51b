pub mod schema;

pub use schema::{Config, GatewayConfig, NotifierConfig, RotationConfig, StoreConfig};
