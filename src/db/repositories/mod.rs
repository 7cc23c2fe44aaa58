mod categories;
mod tasks;
