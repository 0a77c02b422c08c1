pub mod compress;
pub mod decoder;
pub mod thumbnail;
