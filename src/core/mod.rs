pub mod batch;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod traits;
