pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod client;
pub mod config;
pub mod entities;
pub mod error;
pub mod ports;
pub mod session;
pub mod token;

pub use error::{AuthError, Error};
