pub mod media;
pub mod party;
pub mod post;
pub mod publish;
pub mod staged;
pub mod storage;
