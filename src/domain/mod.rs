pub mod adapter;
pub mod io;
pub mod load;
pub mod result;

pub use adapter::*;
pub use io::*;
pub use load::*;
pub use result::*;
