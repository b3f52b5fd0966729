pub mod compute;
pub mod matchmaker;
pub mod notifier;
pub mod session_queue;
