pub mod clear;
pub mod history;
pub mod read;
pub mod send;
