pub mod invoices;
pub mod orders;
pub mod subscription_plans;
pub mod subscriptions;
pub mod users;

pub use invoices as invoice_entity;
pub use orders as order_entity;
pub use subscription_plans as plan_entity;
pub use subscriptions as subscription_entity;
pub use users as user_entity;

pub use orders::{OrderStatus, PaymentGateway};
pub use subscription_plans::{BillingInterval, PlanType};
