// Library surface for headless/integration tests and reuse.
// The binary in main.rs only adds the CLI, logging and terminal setup.
pub mod app;
pub mod app_dirs;
pub mod calibration;
pub mod config;
pub mod controls;
pub mod error;
pub mod game;
pub mod gaze;
pub mod runtime;
pub mod scheduler;
pub mod storage;
pub mod target;
pub mod ui;
