pub mod hashing;
pub mod reader;
pub mod types;
pub mod writer;

pub use reader::Ba2Archive;
pub use writer::Ba2Builder;
