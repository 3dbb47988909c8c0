//! Backend access: transport, response envelope, and the cached gateway.

pub mod endpoints;
pub mod envelope;
pub mod gateway;
pub mod request;
pub mod transport;

pub use endpoints::SpotQuery;
pub use envelope::{Pagination, Payload};
pub use gateway::{ApiGateway, EndpointTtls, GatewayEvent};
pub use request::{ApiRequest, Method};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
