pub mod dispatcher;
pub mod driver;
pub mod loop_breaker;
