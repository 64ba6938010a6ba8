pub mod anchor_client;
pub mod config;
pub mod edge_sync;
pub mod error;
pub mod hex_field;
pub mod routes;
pub mod state;

pub use config::Config;
pub use state::AppState;
