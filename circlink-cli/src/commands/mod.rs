pub mod config;
pub mod detect;
pub mod link;
pub mod logs;
pub mod watch;
