pub mod check;
pub mod models;
pub mod run;
pub mod stats;
