pub mod get_logs;
pub mod recent_logs;
