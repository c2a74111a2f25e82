pub mod tcp;
pub mod utils;

pub use tcp::{decode, encode, expected_frame_len, Frame};
