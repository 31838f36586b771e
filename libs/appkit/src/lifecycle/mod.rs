//! Open/close orchestration of the application and its subsystems.

pub mod application;

pub use application::{AppBuilder, AppError, Application, HandleSnapshot, Step, CLOSE_STEPS, OPEN_STEPS};
