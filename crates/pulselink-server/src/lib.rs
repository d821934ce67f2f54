//! The relay proper: session registry, routing rules, per-connection loops,
//! and the HTTP/WebSocket surface.

pub mod dispatch;
pub mod handlers;
pub mod qrcode;
pub mod registry;
pub mod server;
pub mod session;

pub use dispatch::Dispatcher;
pub use handlers::AppState;
pub use registry::{ClientRegistry, Peer};
pub use server::{build_router, start, ServerHandle};
