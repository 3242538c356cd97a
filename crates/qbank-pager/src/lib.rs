#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod assemble;
pub mod cache;
pub mod fetch;
pub mod pager;
pub mod prefetch;
pub mod probe;
pub mod wire;
