//! Pure in-memory index structures, one per datatype. These hold no disk
//! state; the engine keeps them consistent with the log.

pub mod hash;
pub mod list;
pub mod set;
pub mod zset;

pub use hash::HashIndex;
pub use list::{InsertOption, ListIndex};
pub use set::SetIndex;
pub use zset::ZSetIndex;
