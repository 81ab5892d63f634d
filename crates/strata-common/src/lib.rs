pub mod error;
pub mod types;

pub use error::{CatalogError, Error, Result};
pub use types::{Direction, Version};
