//! Adapters for the services the sigpool control plane talks to: the
//! matchmaker, the downstream notifiers, the session queue and the compute API.

pub mod features;

pub use features::compute::repo::{
    ComputeRepository, InstanceDescription, LaunchRequest, SimulatedComputeRepository,
};
pub use features::matchmaker::http_matchmaker;
pub use features::matchmaker::repo::{MatchmakerRepository, ReqwestMatchmakerRepository};
pub use features::matchmaker::service::MatchmakerService;
pub use features::notifier::repo::{
    HttpNotifierRepository, InMemoryNotifierRepository, NotificationTarget, NotifierRepository,
};
pub use features::notifier::service::NotifierService;
pub use features::session_queue::repo::{
    InMemorySessionQueue, QueueMessage, SessionQueueRepository,
};
