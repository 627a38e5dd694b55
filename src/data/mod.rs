//! Input Data Module
//!
//! Loads raw input records from disk:
//! - DataLoader: the contract the batch engine consumes
//! - DirectoryLoader: reads `.jsonl` / `.json` / `.csv` / `.tsv` files from a directory or file

mod loader;


pub use loader::{DataLoader, DirectoryLoader};
