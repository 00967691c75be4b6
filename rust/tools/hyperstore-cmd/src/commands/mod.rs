//! Command implementations for hyperstore-cmd

pub mod tid;
