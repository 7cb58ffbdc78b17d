pub mod board;
pub mod codec;
pub mod descriptor;
pub mod distance;
pub mod error;
pub mod oracle;
pub mod outcome;
pub mod rules;

pub use board::*;
pub use codec::*;
pub use descriptor::*;
pub use distance::*;
pub use error::*;
pub use oracle::*;
pub use outcome::*;
pub use rules::*;
