pub mod clustering;
pub mod estimate;
pub mod plan;
pub mod zone;
