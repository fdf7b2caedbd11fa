pub mod audit_event;
pub mod order;
pub mod order_item;
pub mod product;
pub mod rate_limit_counter;
pub mod subscription;
pub mod user_address;
