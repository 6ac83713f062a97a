pub mod auth;
pub mod broadcaster;
pub mod dispatcher;
pub mod events;
pub mod notify;
pub mod registry;
pub mod rooms;
pub mod server;
