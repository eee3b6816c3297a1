pub mod common;
pub mod order;
pub mod pagination;
pub mod plan;
pub mod subscription;

pub use common::*;
pub use order::*;
pub use pagination::*;
pub use plan::*;
pub use subscription::*;
