pub mod instance;
pub mod server;
