mod error;
mod runtime;
mod spawn_provider;
mod status;
mod task_queue;

pub use error::*;
#[cfg_attr(docsrs, doc(cfg(any(feature = "async-tokio", feature = "async-smol"))))]
#[cfg(any(feature = "async-tokio", feature = "async-smol"))]
pub use runtime::*;
pub use spawn_provider::*;
pub use status::*;
pub use task_queue::*;
