//! Portable, exact implementation of scaled dot-product attention.
//!
//! This path favours clarity over absolute performance and is the kernel the
//! multi-head layer runs on.

pub mod exact;

pub use exact::ExactAttention;
