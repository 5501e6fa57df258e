pub mod gold;
pub mod log;
pub mod silver;
pub mod table;

pub use gold::GoldProcessor;
pub use silver::SilverProcessor;
