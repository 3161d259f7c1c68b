pub mod constants;
pub mod divisions;
pub mod engine;
pub mod structures;
