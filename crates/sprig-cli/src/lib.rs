#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Library surface of the sprig CLI: the HTTP service router, exposed so
//! integration tests can drive it in-process.

pub mod server;
