//! Drivers: subsistema de input, misc devices e o driver de teste.

pub mod input;
pub mod input_test;
pub mod misc;
