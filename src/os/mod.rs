// src/os/mod.rs

//! Thin wrappers over the OS primitives the driver needs.

pub mod shm;
