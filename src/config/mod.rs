pub mod consts;
pub mod keeper;

pub use keeper::{CliArgs, KeeperConfig};
