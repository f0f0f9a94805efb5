//! Near-real-time MRMS radar tiles: a resolver service that locates the latest
//! reflectivity dataset, and a display controller that keeps a map overlay current.

pub mod api;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod display;
pub mod error;
pub mod feed;
pub mod grib;
pub mod http_client;
pub mod resolver;
pub mod tiles;
pub mod types;
pub mod utils;
