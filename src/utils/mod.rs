pub mod radix;

pub use radix::*;
