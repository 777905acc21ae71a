/// Languages executed by an interpreter that has to be bootstrapped once
/// per process before the first run.
pub mod python;
pub mod runtime;
