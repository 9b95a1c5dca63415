pub mod error;
pub mod todo;
pub mod validation;

pub use error::CoreError;
pub use todo::{CreateTodo, TodoItem, UpdateTodo};
pub use validation::{Validate, ValidationErrors};
