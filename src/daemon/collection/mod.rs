pub mod poller;
pub mod resolver;
pub mod snapshot;
