pub mod file_loader;

pub use file_loader::{load_documents, load_prompts};
