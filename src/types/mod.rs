pub mod averages;
pub mod records;
pub mod tick;

pub use averages::*;
pub use records::*;
pub use tick::*;
