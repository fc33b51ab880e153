pub mod frame;

pub use frame::{Frame, MAX_DATA_LEN, MAX_EXTENDED_ID, MAX_STANDARD_ID};
