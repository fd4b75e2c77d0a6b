// src/os/mod.rs

//! Raw OS primitives used by the relay: anonymous pipes and their
//! ownership bookkeeping.

pub mod pipe;
