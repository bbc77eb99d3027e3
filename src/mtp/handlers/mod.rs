pub mod device_ops;
pub mod dir_ops;
pub mod file_ops;
