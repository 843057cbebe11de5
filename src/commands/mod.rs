pub mod download;
pub mod plan;

pub use download::download;
pub use plan::plan;
