pub mod audit;
pub mod enrichment;
