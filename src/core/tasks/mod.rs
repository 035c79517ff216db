// src/core/tasks/mod.rs

//! Work that runs outside the request path: deferred writes and purges, the
//! periodic maintenance sweep, and stale-while-revalidate refreshes.

pub mod deferred;
pub mod maintenance;
pub mod revalidation;
