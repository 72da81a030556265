pub mod routes;
pub mod server;

pub use routes::{GatewayState, WORKER_ID_HEADER};
pub use server::GatewayServer;
