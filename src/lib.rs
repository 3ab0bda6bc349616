pub mod barcode;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod hanteo;
pub mod mapper;
pub mod model;
pub mod server;
pub mod shopify;
pub mod submitter;
pub mod sweep;
