pub mod connection;
pub mod delivery;
pub mod dispatcher;
pub mod presence;
pub mod relay;
pub mod rooms;

pub use delivery::DeliveryError;
pub use dispatcher::Dispatcher;
