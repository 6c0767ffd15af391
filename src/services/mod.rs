pub mod job_store;
pub mod storage;
pub mod transform;
pub mod worker;
