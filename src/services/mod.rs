pub mod aggregator;
pub mod health;
pub mod inbox;
pub mod registry;
pub mod thread;

pub use health::StoreHealthGuard;
pub use inbox::InboxController;
pub use registry::{SessionRegistry, UserSession};
pub use thread::ThreadSession;
