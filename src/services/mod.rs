pub mod disk;
pub mod ingest;
pub mod policy;
pub mod rate_limit;
pub mod reaper;
pub mod receiver;
pub mod scanner;
pub mod storage;
pub mod worker;
