// crates/types/src/lib.rs
pub mod conversation;
pub mod error;
pub mod generation;
pub mod notification;
pub mod session;
pub mod wire;

pub use conversation::*;
pub use error::*;
pub use generation::*;
pub use notification::*;
pub use session::*;
pub use wire::*;
