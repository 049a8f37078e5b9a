//! Four-stage pipeline runtime that turns a routing table into live,
//! handshaken connections to upstream LLM providers, and the load-balancing
//! router and dispatcher that route client requests across them.

pub mod canonical;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod factory;
mod headers;
#[cfg(feature = "http")]
pub mod handler;
pub mod manager;
pub mod message;
pub mod module;
pub mod pipeline;
pub mod preprocessor;
pub mod registry;
pub mod router;
pub mod stages;
pub mod transform;
pub mod wire;

pub use context::ExecutionContext;
pub use dispatcher::Dispatcher;
pub use error::PipelineError;
pub use factory::PipelineFactory;
pub use manager::PipelineManager;
pub use message::{Direction, PipelineMessage};
pub use module::Module;
pub use pipeline::Pipeline;
pub use preprocessor::{ConfigPreprocessor, RouteEntry, RoutingTable};
pub use router::{LoadBalancerRouter, RouterEvent};
