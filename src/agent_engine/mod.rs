pub mod action;
pub mod engine;
pub mod event_bus;
pub mod history;
pub mod intent;
pub mod loop_control;
pub mod parser;
pub mod state;
pub mod task_history;
