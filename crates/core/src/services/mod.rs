pub mod inspection;

pub use inspection::{InspectError, InspectedTarget, Inspector};
