//! cambio-core: the currency-operation pipeline of a casa de cambio.
//!
//! Services are plain constructed objects wired together by
//! `engine::DeskEngine`. Nothing in this crate holds global state.

pub mod alert;
pub mod client;
pub mod clock;
pub mod config;
pub mod currency;
pub mod drawer;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod forecast;
pub mod fraud;
pub mod name_generator;
pub mod operation;
pub mod pair;
pub mod profile;
pub mod quote;
pub mod rng;
pub mod store;
pub mod types;
