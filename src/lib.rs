//! Local bridge that dispatches print jobs to TCP, USB, and OS-spooler
//! printers, reachable over a local WebSocket command surface and a remote
//! cloud queue poller.

pub mod cli;
pub mod cloud;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod runtime_config;
pub mod transport;
pub mod ws_server;
