#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
pub mod defaults;
mod metrics;
mod mode;
mod namespace;
mod resolver;
pub mod translate;

pub use self::{
    metrics::Metrics,
    mode::ActivationMode,
    resolver::{Config, Resolver},
};
