//! External monitoring integrations: the OAuth2 token gateway for the
//! AppDynamics controller and the correlation echo adapters.

pub mod appdynamics;
pub mod opentelemetry;
pub mod token;

pub use appdynamics::AppDynamicsEcho;
pub use opentelemetry::OpenTelemetryEcho;
pub use token::{AuthError, ReqwestTokenTransport, TokenGateway, TokenInfo, TokenTransport};
