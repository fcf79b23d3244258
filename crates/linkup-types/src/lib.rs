pub mod api;
pub mod call;
pub mod events;
pub mod ids;
pub mod models;
