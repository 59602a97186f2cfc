//! Attention primitives for the transformer encoder.
//!
//! The kernel in [`reference`] computes scaled dot-product attention over
//! head-split tensors with layout `[batch, n_heads, seq_len, head_dim]`.
//! [`multi_head`] wraps it with the query, key, value and output projections
//! that operate on `(batch, seq, hidden)` hidden states.
//!
//! Masks are binary keep-masks (`1` = attend, `0` = blocked) of any dtype that
//! broadcast to `[batch, n_heads, q_len, k_len]`; the builders in [`masks`]
//! emit `u8`. Blocked scores are replaced
//! by [`Config::mask_fill`] before the softmax. Dropout on the attention
//! weights follows the process-wide training flag from the layers crate.

pub mod core;
pub mod masks;
pub mod multi_head;
pub mod reference;

pub use core::{Attention, AttentionError, Config, MAX_MASK_FILL};
pub use multi_head::{MultiHeadAttention, MultiHeadConfig, SelfAttention};
pub use reference::ExactAttention;
