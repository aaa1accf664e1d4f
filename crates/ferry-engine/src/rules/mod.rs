//! Model registry, selection predicates, and the built-in model catalog.

pub mod catalog;
pub mod handlers;
pub mod model;
pub mod pattern;
pub mod predicate;
pub mod registry;

pub use model::{Handler, HandlerError, ModelBuilder, TransformModel};
pub use predicate::{Predicate, PredicateError};
pub use registry::{ModelRegistry, RegistryError, Selection};
