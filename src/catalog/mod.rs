pub mod operation;
pub mod path_config;
pub mod rules;
pub mod transformation;
pub mod transformation_key;
