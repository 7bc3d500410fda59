pub mod config;
pub mod logging;

pub mod backend;
pub mod cleanup;
pub mod control;
pub mod dispatcher;
pub mod frontend;
pub mod heartbeat;
pub mod job_db;
pub mod job_store;
pub mod lease;
pub mod options;
pub mod retry;
pub mod scheduler;
pub mod segmenter;
pub mod storage;
pub mod studio;
pub mod subtitle;
