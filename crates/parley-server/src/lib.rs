pub mod config;
pub mod health;
pub mod page;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{ServerConfig, StoreConfig, DEFAULT_DATABASE_URL};
pub use server::{AppState, ChatServer};
pub use shutdown::ShutdownCoordinator;
pub use websocket::registry::ConnectionRegistry;
