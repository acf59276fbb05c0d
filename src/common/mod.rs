pub mod config;
pub mod paths;
pub mod process;
pub mod text;
