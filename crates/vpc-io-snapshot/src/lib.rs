//! Snapshot encoding shared by the virtual peripheral models.

pub mod io;
