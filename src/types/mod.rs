pub mod conversions;
pub mod memo;

pub use memo::{MemoRecord, RawMemoEvent};
