//! Provides thread-safe, blocking cache implementations.
//!
//! The `init` closures and loaders run on the calling thread, and callers
//! waiting for another caller's computation block their thread until it is
//! done.

mod builder;
mod cache;
mod loading;
mod value_initializer;

pub use {
    builder::CacheBuilder,
    cache::Cache,
    loading::{Loader, LoadingCache},
};
