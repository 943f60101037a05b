pub mod dispatcher;
pub mod http;
pub mod path;
pub mod sse;
pub mod websocket;

pub use dispatcher::{AdmissionOutcome, GatewayState};
pub use path::{parse_route, Route};
