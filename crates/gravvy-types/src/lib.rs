pub mod api;
pub mod events;
pub mod models;
pub mod phone;

pub use phone::{PhoneNumber, PhoneNumberError};
