//! `tollgate-kernel`: contracts shared by the Tollgate gateway runtime.
//!
//! Nothing in this crate performs network I/O.  It defines the request and
//! response types that flow through the middleware chain, the traits each
//! runtime component implements, and the configuration model together with
//! its loader.

// config module
pub mod config;

// gateway contracts
pub mod gateway;
