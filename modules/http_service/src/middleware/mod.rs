pub mod access_log;
pub mod identity;
pub mod request_id;
