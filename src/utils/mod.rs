pub mod selection;

pub use selection::{select, SelectionError};
