pub mod call_start;
pub mod call_stop;
pub mod quota;
