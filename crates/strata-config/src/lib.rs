pub mod loader;
pub mod model;

pub use loader::{ConfigLoader, expand_env, expand_env_with};
pub use model::{
    DEFAULT_LEDGER_TABLE, DbConf, DbDriver, DriverKind, EnvironmentConfig, validate_table_name,
};
