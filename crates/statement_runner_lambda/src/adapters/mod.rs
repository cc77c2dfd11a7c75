pub mod credentials;
pub mod data_api;
