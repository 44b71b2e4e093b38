pub mod gateway;
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod types;
