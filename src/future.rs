//! Provides thread-safe, asynchronous (futures aware) cache implementations.
//!
//! Nothing in this module depends on a specific async runtime. Callers waiting
//! for another caller's computation are suspended on an `async-lock` lock.
//!
//! To use this module, enable a crate feature called "future".

mod builder;
mod cache;
mod loading;
mod slot;
mod value_initializer;

pub use {
    builder::CacheBuilder,
    cache::Cache,
    loading::{Loader, LoadingCache},
    slot::Slot,
};
