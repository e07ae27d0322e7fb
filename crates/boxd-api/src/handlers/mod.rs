//! Request handlers for the container API.

mod containers;
mod exec;
mod files;
mod operations;
mod snapshots;
mod state;

pub use containers::{
    create_container, delete_container, get_container, list_containers, post_container,
    update_container,
};
pub use exec::exec_container;
pub use files::{get_file, put_file};
pub use operations::{get_operation, operation_websocket};
pub use snapshots::{
    create_snapshot, delete_snapshot, get_snapshot, list_snapshots, rename_snapshot,
};
pub use state::{get_state, put_state};
