pub mod history;
pub mod scan;
pub mod signatures;

pub use history::*;
pub use scan::*;
pub use signatures::*;
