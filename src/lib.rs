pub mod config;
pub mod deliver;
pub mod normalize;
pub mod pipeline;
pub mod process;
