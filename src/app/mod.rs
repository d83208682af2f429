pub mod bootstrap;
pub mod controller;
pub mod render;

pub use bootstrap::run;
