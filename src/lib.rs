pub mod compiler;
pub mod dsl;
pub mod edit;
pub mod graph;
pub mod schema;
