pub mod commands;
pub mod manager;
pub mod selector;
pub mod session;
pub mod state;
pub mod votes;
