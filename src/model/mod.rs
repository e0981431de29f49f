pub mod bulk;
pub mod common;
pub mod error;
pub mod resource;

pub use bulk::*;
pub use common::*;
pub use error::*;
pub use resource::*;
