pub mod application;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod http;
pub mod listeners;
pub mod notifier;
pub mod storage;
pub mod telemetry;
