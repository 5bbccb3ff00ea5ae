pub mod batch;
pub mod client;
pub mod error;
pub mod job;
pub mod persist;
pub mod postprocess;
pub mod presets;
pub mod request;
pub mod response;
pub mod runlog;
pub mod runtime;
pub mod scheduler;
pub mod settings;
