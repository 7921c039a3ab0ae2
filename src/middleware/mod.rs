pub mod guards;
pub mod logging;

pub use guards::User;
pub use logging::Logging;
