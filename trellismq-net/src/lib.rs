#![deny(unsafe_code)]

mod error;
mod server;
mod stream;

pub use error::TmqError;
pub use server::{Builder, Listener};
pub use stream::TmqStream;

pub type Error = anyhow::Error;
pub type Result<T> = anyhow::Result<T, Error>;
