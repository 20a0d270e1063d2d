//! The content registry layer: primitive types, VM profiles, instruction
//! packages, and the environments composed from them. Registries own their
//! content; the rest of the compiler borrows `Rc` handles.

pub mod environments;
pub mod packages;
pub mod primitives;
pub mod profiles;
