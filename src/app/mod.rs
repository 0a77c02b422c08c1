pub mod avatars;
pub mod banner;
pub mod posts;
pub mod publish;
pub mod staging;
pub mod urls;
