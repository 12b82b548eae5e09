//! Catalog API access: domain types, the network transport and the cached
//! service the rest of the app talks to.

mod client;
mod service;
mod types;

pub use client::HttpCatalogClient;
pub use service::CatalogService;
pub use types::{Focaccia, FocacciaCreate};
