pub mod events;
pub mod keys;
pub mod session;
pub mod storage;
pub mod wardrobe;
