#![allow(rustdoc::bare_urls)]
#![doc = include_str!("../README.md")]

mod dense;
mod encode;
mod estimate;
mod flow;
mod hasher;
mod sketch;
mod sparse;
mod tables;
mod vint;
mod wire;

pub mod mesh;

pub use flow::{Collective, CountDistinct, FlowError};
pub use hasher::DefaultHasher;
pub use sketch::Sketch;
pub use wire::{Wire, WireError};
