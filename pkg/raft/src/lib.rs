#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate serde_derive;

pub mod errors;
pub mod protos;
pub mod config;
pub mod log;
mod state;
pub mod persist;
pub mod rpc;
pub mod consensus;
pub mod replica;

pub use replica::Replica;
