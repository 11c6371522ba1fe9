pub mod db;
pub mod ollama;

pub use db::DbAdapter;
pub use ollama::OllamaAdapter;
