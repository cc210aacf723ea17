pub mod connectors;
pub mod executor;
pub mod introspector;
pub mod schema;
