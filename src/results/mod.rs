//! Result delivery: backpressured streaming to a callback, or full buffering

mod buffer;
mod callback;
mod stream;

pub use buffer::*;
pub use callback::*;
pub use stream::*;
