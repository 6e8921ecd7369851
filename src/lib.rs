pub mod config;
pub mod controller;
pub mod hotkey;
pub mod paths;
pub mod send_log;
pub mod sender;
pub mod session;
pub mod supervisor;
