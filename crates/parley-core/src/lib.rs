pub mod ids;
pub mod message;

pub use ids::{ClientId, ConnectionId};
pub use message::{ack_line, chat_line, left_line, Message, STORE_ERROR_LINE};
