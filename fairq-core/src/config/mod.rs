mod drr;

pub use drr::*;
