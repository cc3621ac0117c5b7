pub mod gate;
pub mod pipeline;
pub mod stability;
pub mod traits;
pub mod types;
