pub mod action;
pub mod fleet;
pub mod health;
pub mod heartbeats;
pub mod info;
