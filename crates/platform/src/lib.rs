//! Host-side plumbing shared by the PS/2 device models: the x86 port-I/O bus.

#![forbid(unsafe_code)]

pub mod io;
