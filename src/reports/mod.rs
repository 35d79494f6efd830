pub mod aggregate;
pub mod export;
pub mod period;
pub mod rows;
