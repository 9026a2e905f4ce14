#[cfg(feature = "sim")]
pub mod factory;
pub mod simulated;

#[cfg(feature = "sim")]
pub use factory::*;
pub use simulated::*;
