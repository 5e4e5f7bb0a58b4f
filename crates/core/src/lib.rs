pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod task;

pub use client::FractalClient;
pub use config::{
    load_dotenv, AdapterKind, FractalConfig, HeartbeatConfig, ManagerConfig, MAX_TASKS_CEILING,
};
pub use error::*;
pub use manager::*;
pub use task::*;
