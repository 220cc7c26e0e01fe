pub mod identity;
pub mod middleware;
pub mod schemas;
pub mod token;
pub mod utils;
