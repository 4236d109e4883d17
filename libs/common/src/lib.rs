pub mod conversation;
pub mod id;
pub mod models;
pub mod protocol;
