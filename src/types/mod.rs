//! Types
//!
//! Request, response, credential and configuration types.

pub mod config;
pub mod request;
pub mod response;
pub mod token;

pub use config::*;
pub use request::*;
pub use response::*;
pub use token::*;
