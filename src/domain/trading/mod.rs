pub mod fees;
pub mod position;
pub mod types;
