// Utils module - filesystem helpers shared by backup and install
pub mod fs;

pub use fs::{copy_path, move_path, remove_path};
