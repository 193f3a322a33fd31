pub mod builder;
pub mod process;
