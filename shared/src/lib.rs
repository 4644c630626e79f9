pub mod protocol;
pub mod stats;
pub mod items;
pub mod abilities;
pub mod entities;

pub use protocol::*;
pub use stats::*;
pub use items::*;
pub use abilities::*;
pub use entities::*;
