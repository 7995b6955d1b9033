//! GerryDB data-model kernel: a versioned, namespaced object graph over
//! Postgres with bitemporal geographies and column values, a view composer
//! for consistent cross-namespace snapshots, and a render coordinator for
//! bulk GeoPackage exports.

pub mod auth;
pub mod column;
pub mod column_set;
pub mod db;
pub mod error;
pub mod etag;
pub mod geo_import;
pub mod geography;
pub mod geos;
pub mod graph;
pub mod layer;
pub mod locality;
pub mod meta;
pub mod models;
pub mod namespace;
pub mod partition;
pub mod paths;
pub mod plan;
pub mod render;
pub mod view;

pub use error::{Error, Result};
