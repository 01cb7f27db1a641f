pub mod hashing;
pub mod parser;
pub mod types;

pub use parser::BsaArchive;
