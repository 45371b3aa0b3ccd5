// Business domains
pub mod credits;
pub mod generation;
