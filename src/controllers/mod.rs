pub mod service;

pub use service::ServiceWatcher;
