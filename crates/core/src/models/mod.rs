pub mod analytics;
pub mod holding;
pub mod quote;
pub mod settings;
