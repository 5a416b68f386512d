//! Decode-thread state.

pub mod binding;
mod thread_info;

pub use binding::ThreadBinding;
pub use thread_info::RenderThreadInfo;
