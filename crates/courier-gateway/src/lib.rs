pub mod connection;
pub mod coordinator;
pub mod registry;
