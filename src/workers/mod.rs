pub mod refresh;
pub mod session_gc;

pub use refresh::InboxRefreshWorker;
pub use session_gc::SessionGcWorker;
