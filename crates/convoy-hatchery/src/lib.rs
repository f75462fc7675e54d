//! Provisioning agents for the Convoy CD engine.
//!
//! A hatchery is a long-lived process representing one compute backend. It
//! polls the shared queue, books jobs it can satisfy, and spawns worker
//! instances through a [`convoy_core::driver::ComputeDriver`]. The pool
//! control loop lives in [`controller`] and is written once against the
//! driver trait; the backends live in [`drivers`].

pub mod controller;
pub mod drivers;

pub use controller::{PoolConfig, PoolController, SpawnRegistry};
