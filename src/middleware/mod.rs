pub mod context;
pub mod timing;
