//! Network Module
//!
//! TCP front end through which the host storage manager issues its calls.
//!
//! ## Architecture
//! - Single acceptor thread polling a shutdown flag
//! - One thread per connection, bounded by `max_connections`
//! - Commands routed through [`Engine::execute`](crate::engine::Engine::execute)

mod connection;
mod server;

pub use connection::Connection;
pub use server::Server;
