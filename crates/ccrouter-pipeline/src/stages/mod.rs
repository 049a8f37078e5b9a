//! Concrete Module strategies for the four stage families
//!
//! Each submodule registers its strategies into a `StageRegistry` via a
//! `register_all` function; `crate::factory::PipelineFactory::new`
//! calls all four.

pub mod protocol;
pub mod server;
pub mod server_compat;
pub mod transformer;
