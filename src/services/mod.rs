pub mod account_service;
pub mod library_service;
pub mod staging;
pub mod storage_service;
