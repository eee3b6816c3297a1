pub mod payment_service;
pub mod reconciliation_service;
pub mod subscription_service;

pub use payment_service::*;
pub use reconciliation_service::*;
pub use subscription_service::*;
