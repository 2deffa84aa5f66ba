pub mod scheduler;
pub mod storage;
pub mod work_dir;
pub mod worker;
