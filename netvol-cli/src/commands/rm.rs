use anyhow::Result;
use clap::Args;
use netvol::{Request, VolumePlugin};

use crate::cli::{GlobalFlags, print_response};

#[derive(Args, Debug)]
pub struct RmArgs {
    /// Volume name
    pub name: String,
}

pub fn execute(args: RmArgs, global: &GlobalFlags) -> Result<()> {
    let driver = global.create_driver()?;
    print_response(&driver.handle_remove(&Request::named(args.name)))
}
