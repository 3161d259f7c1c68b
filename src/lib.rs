pub mod api;
pub mod args;
pub mod bancho;
pub mod database;
pub mod error;
pub mod lobby;
pub mod model;
pub mod protocol;
pub mod utils;
