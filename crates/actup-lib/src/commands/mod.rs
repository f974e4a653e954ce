pub mod acquire;
pub mod app;
pub mod update;
