//! CLI modules for Backup Keeper.

pub mod keeper;
pub mod runner;

pub use keeper::{KeeperCli, KeeperCommand};
pub use runner::run;
