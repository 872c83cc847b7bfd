pub mod config;
pub mod cost;
pub mod database;
pub mod distributed;
pub mod executors;
pub mod parameters;
pub mod sampling;
pub mod solver;
