pub mod api;
pub mod events;
pub mod filters;
pub mod models;
