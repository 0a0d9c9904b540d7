pub mod demo;
pub mod metrics_handler;
