pub mod message;
pub mod thread;

pub use message::{Message, NewMessage};
pub use thread::ThreadSummary;
