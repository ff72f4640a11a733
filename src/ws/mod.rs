pub mod engine;
pub mod handler;
pub mod registry;
pub mod room;
pub mod session;
