pub mod features;
pub mod health;
pub mod subscription;
pub mod usage;
pub mod webhook;
