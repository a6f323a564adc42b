//! Core Components
//!
//! Wire-level infrastructure shared by every other module.

pub mod transport;

pub use transport::*;
