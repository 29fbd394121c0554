pub mod staged_file;
pub mod utils;
