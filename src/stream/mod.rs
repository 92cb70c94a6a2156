pub mod encoder;
pub mod resolver;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use encoder::*;
pub use resolver::*;
pub use session::*;
