pub mod codec;
pub mod config;
pub mod error;
pub mod form;
pub mod limits;
pub mod media;
pub mod model;
pub mod resolver;
pub mod types;
