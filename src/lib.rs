#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod client;
pub mod controller;
pub mod errors;
pub mod types;
pub mod utils;
