pub mod catalog;
pub mod error;

pub use catalog::{Catalog, Procedure};
pub use error::CatalogError;
