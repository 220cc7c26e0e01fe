pub mod client;
pub mod user;
pub mod webhook;

pub use client::*;
pub use user::*;
pub use webhook::*;
