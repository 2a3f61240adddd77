//! Best master clock algorithm

pub mod bmca;
pub mod dataset_comparison;
pub mod foreign_master;
