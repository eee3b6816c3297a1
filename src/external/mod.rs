pub mod gateway;
pub mod stripe;

pub use gateway::*;
pub use stripe::StripeGateway;
