//! Sub-agent delegation and control-request bubbling.
//!
//! A cooperative child runs as a nested [`Computation`](crate::control::Computation)
//! inside its parent's step. Whatever the child suspends on is wrapped in a
//! sub-agent query carrying the child's identity and depth, then suspended
//! on again in the parent's context. A request raised `D` frames down thus
//! reaches the top-level driver under `D` wrappers, and the answer is peeled
//! back one layer per frame on the way down.
//!
//! ```text
//!  driver ◄── Wc(Wg(req)) ── root ◄── Wg(req) ── child ◄── req ── grandchild
//!         ── answer(Wc) ───►      ── answer(Wg) ──►     ── answer(req) ──►
//! ```
//!
//! `Wg` is added by the frame of the grandchild, `Wc` by the frame of the child.

mod frame;
mod spawn;

pub use frame::DelegationFrame;
pub use spawn::{spawn, DelegationMode, SubAgent};
