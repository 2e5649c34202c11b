pub mod subscription;
pub mod usage;
pub mod webhook;
pub mod winback;
