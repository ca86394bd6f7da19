mod handler;
pub mod messages;
mod stt;

pub use handler::{should_send, ws_handler};
