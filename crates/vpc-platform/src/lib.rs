//! Port-mapped I/O plumbing shared by the peripheral models.

#![forbid(unsafe_code)]

pub mod io;
