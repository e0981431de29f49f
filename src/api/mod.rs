pub mod bulk_handlers;
pub mod handlers;
pub mod negotiation;
pub mod routes;

pub use bulk_handlers::*;
pub use handlers::*;
pub use negotiation::{negotiate, Endpoint, Negotiated, RequestFormat};
pub use routes::*;
