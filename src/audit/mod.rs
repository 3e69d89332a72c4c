pub mod model;
pub mod replay;
pub mod writer;
