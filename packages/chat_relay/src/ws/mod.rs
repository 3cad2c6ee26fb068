//! Chat WebSocket
//!
//! Single WebSocket connection per chat client that:
//! - Accepts `Chat` prompts and relays generated text increments
//! - Handles out-of-band `Stop` while a generation is streaming
//! - Finalizes every generation with exactly one terminal event

mod protocol;
mod session;


pub use protocol::{ClientMessage, ServerMessage};
pub use session::handle_socket;
