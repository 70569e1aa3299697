//! plugbrowser UI layer.
//!
//! The chrome is a line-oriented console: each line on stdin is one user
//! gesture, and tab state is printed back as text.

pub mod console;
