pub mod bind;
pub mod dispatch;
pub mod errors;
pub mod info;
pub mod scope;
pub mod tree;
pub mod types;
