pub mod backend;
pub mod file_backend;
pub mod root_repository;
