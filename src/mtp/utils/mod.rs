pub mod metadata;
pub mod path_resolver;
pub mod volume;
