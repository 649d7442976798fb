// Library crate behind the `secure_echo` and `gen_certs` binaries.
// The binaries only parse flags and wire these modules together.

pub mod auth;
pub mod certs;
pub mod client;
pub mod config;
pub mod echo;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod observability;
pub mod rpc;
pub mod server;
pub mod shell;
pub mod types;
pub mod version;

#[cfg(test)]
mod testing;
