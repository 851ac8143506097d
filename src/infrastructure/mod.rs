pub mod bus;
pub mod core;
pub mod directory;
pub mod exchange;
pub mod mock;
pub mod persistence;
