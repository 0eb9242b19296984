mod items;
mod outfits;

pub use items::{Category, ClothingItem, NewClothingItem};
pub use outfits::{CompositeRow, GeneratedOutfit, GeneratorSource, NewGeneratedOutfit};
