//! Link implementations

pub mod echo;

pub use echo::EchoLink;
