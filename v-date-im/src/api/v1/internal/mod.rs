pub mod profile;
pub mod subscription;
