pub mod bindings;
pub mod demo;
pub mod normalize;
