//! Schema validation for job input and output payloads.
//!
//! The queue core does not mandate a specific schema engine: it only
//! requires something that implements [`Validator`]. [`Schema`] is the
//! bundled rule-based implementation; wrap any other engine with
//! [`FnValidator`].

pub mod errors;
pub mod rules;
pub mod schema;

pub use errors::{FieldError, ValidationErrors};
pub use rules::Rule;
pub use schema::{AnySchema, FnValidator, Schema, Validator};
