//! CLI subcommand handlers. Each is a thin driver over the [`Engine`]
//! facade, printing progress the way `commands/init.rs` prints its wizard
//! steps — `console::style` for emphasis, plain `println!` otherwise.

pub mod compare;
pub mod scan;
pub mod serve;
pub mod sync;
