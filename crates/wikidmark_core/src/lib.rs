pub mod config;
pub mod confluence;
pub mod convert;
pub mod diff;
pub mod filesystem;
pub mod render;
pub mod runtime;
pub mod transform;
