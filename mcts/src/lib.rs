pub mod async_search;
#[cfg(test)]
mod counting_game;
pub mod node;
pub mod options;
pub mod tree;

pub use async_search::*;
pub use node::*;
pub use options::*;
pub use tree::*;
