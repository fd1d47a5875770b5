pub mod api;
pub mod battery;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimation;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod trip;
pub mod validator;
