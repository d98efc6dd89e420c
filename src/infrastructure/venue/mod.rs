pub mod client;
pub mod paper;
