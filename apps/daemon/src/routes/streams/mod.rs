pub mod add_stream;
pub mod configure_stream;
pub mod delete_stream;
pub mod get_stream;
pub mod get_stream_logs;
pub mod list_streams;
pub mod start_stream;
pub mod stop_stream;
