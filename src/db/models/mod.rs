pub mod category;
pub mod task;

pub use category::{
    parse_resolvable_category_id, resolvable_category_id, Category, CategoryColor,
};
pub use task::{NewTask, Task, TaskUpdate};
