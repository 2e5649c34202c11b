pub mod entitlement;
pub mod scheduler;
