#![allow(dead_code)]

pub mod builders;
pub mod mock_connector;
pub mod mock_transport;
pub mod strategies;

pub use builders::*;
pub use mock_connector::*;
pub use mock_transport::*;
