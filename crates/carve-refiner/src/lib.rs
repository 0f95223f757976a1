//! Counterexample-guided abstraction refinement
//!
//! This crate is the refinement core of the verifier. The forward
//! [`analysis`] builds an abstract reachability graph over a control flow
//! automaton; whenever it reaches a target state, a refinement driver
//! extracts the path's [`block_formulas`], checks them with the
//! [`trace_checker`] and, if the path is spurious, applies one of the
//! [`strategy`] implementations to the resulting interpolant sequence. The
//! [`cegar`] loop ties exploration and refinement together until a verdict
//! is reached.
//!
//! Two drivers are available: the path-wise [`driver::PathWiseRefiner`]
//! refines one target path per round, the [`global::GlobalRefiner`] walks
//! all open target paths in a single depth-first traversal sharing one
//! prover stack.

pub mod analysis;
pub mod block_formulas;
pub mod cegar;
pub mod driver;
pub mod global;
pub mod strategy;
pub mod trace_checker;
