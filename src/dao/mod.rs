pub mod models;
pub mod retry;
pub mod room_store;
pub mod storage;
