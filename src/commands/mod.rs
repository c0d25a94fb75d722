pub mod download_tiles;
pub mod plan_tiles;
pub mod status;
pub mod wait_for_tiles;

pub use download_tiles::download_tiles;
pub use plan_tiles::plan_tiles;
pub use status::status;
pub use wait_for_tiles::{wait_for_tiles, WaitOptions};
