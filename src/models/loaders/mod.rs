pub mod toml_loader;

pub use toml_loader::{load_all_job_files, load_job_file, load_pricing_table, load_taxonomy};
