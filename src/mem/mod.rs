//! Working-area placement and allocators for thread storage.

mod working_area;

#[cfg(feature = "dynamic")]
mod pool;

pub use working_area::{
    min_working_area_size, working_area_size, StackSpan, WorkingArea, MIN_STACK_SIZE, WA_ALIGN,
};

#[cfg(feature = "dynamic")]
pub use pool::ThreadPool;
