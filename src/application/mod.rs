// Application layer: use cases over the repository.

pub mod error;
pub mod reporting;
pub mod service;
pub mod session;

pub use error::*;
pub use reporting::*;
pub use service::*;
pub use session::*;
