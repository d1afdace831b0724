pub mod classical;
pub mod constraints;
pub mod heuristic;
pub mod linalg;
pub mod oracle;
pub mod subset;
