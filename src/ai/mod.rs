pub mod core;
pub mod providers;
pub mod rag;
