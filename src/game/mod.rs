//! Game session module
//!
//! Shared state of a poker table (active users and played cards) and the
//! application listeners that update it.

mod cards;
mod session;
mod users;

pub use cards::*;
pub use session::*;
pub use users::*;
