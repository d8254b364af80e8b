pub mod cli;
pub mod config;
pub mod model;
pub mod patch;
pub mod prepare;
pub mod probe;
pub mod resolver;

mod api;

pub use api::{Formulate, FormulateBuilder};
pub use model::{
    formula::Formula,
    plan::ResolvedPlan,
    template::Variables,
};
pub use probe::ProbeSnapshot;
pub use resolver::{ResolveError, Resolver, Selection};
