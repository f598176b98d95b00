// Request and Response value objects — mutable carriers for one HTTP exchange.

pub mod request;
pub mod response;

pub use request::Request;
pub use response::{Response, TextEncoding};
