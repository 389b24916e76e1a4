//! Application services: the purge cycle and the collaborator ports.

pub mod cycle;
pub mod error;
pub mod repos;
