pub mod ingest;
pub mod rate_limit;
pub mod signature;
pub mod worker;
