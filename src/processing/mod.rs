pub mod image;
pub mod mime;
