// Contracts Module - statically supplied ABIs

pub mod memo_abi;

pub use memo_abi::{MemoAbi, DEFAULT_EVENT_NAME};
