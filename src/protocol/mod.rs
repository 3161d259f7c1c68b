pub mod decoder;
pub mod events;
