//! Unit tests that lower small jaxprs end to end.
//!
//! Most tests build a jaxpr with [`mosaic_jaxpr::Tracer`], lower it into a
//! standalone `main` function with [`helpers::lower_standalone`], and then
//! inspect the emitted operations or run them in the reference evaluator.

mod helpers;

mod dispatch;
mod memory;
mod prng;
mod sync;
