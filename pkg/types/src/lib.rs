pub mod config;
pub mod namespace;
pub mod quantity;
pub mod quota;
pub mod quota_increase;
pub mod selector;
pub mod validate;
