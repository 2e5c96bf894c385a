#![allow(dead_code)]

mod backend;
mod helpers;

pub use backend::GatedBackend;
pub use helpers::*;
