pub mod admission;
pub mod command;
pub mod process;
pub mod runner;
pub mod storage;
pub mod types;
pub mod warm;
