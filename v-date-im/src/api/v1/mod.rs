pub mod calls;
pub mod health;
pub mod internal;
pub mod message;
pub mod presence;
pub mod protocol;
pub mod usage;
