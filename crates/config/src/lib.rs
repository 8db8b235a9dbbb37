//! Configuration for tollgate: fixed protocol constants, the file schema and
//! the discovery/loading logic.

pub mod constants;
pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{data_dir, discover_and_load, load_config, set_config_dir},
    schema::{EngineConfig, RpcConfig, TollgateConfig, WsConfig},
};
