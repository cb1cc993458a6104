pub mod document;
pub mod format;
pub mod manager;
pub mod registry;
pub mod settings;
pub mod store;
pub mod tickets;
