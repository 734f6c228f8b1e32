use anyhow::Result;
use clap::Args;
use netvol::{Request, VolumePlugin};

use crate::cli::{GlobalFlags, print_response};

#[derive(Args, Debug)]
pub struct PathArgs {
    /// Volume name
    pub name: String,
}

pub fn execute(args: PathArgs, global: &GlobalFlags) -> Result<()> {
    let driver = global.create_driver()?;
    print_response(&driver.handle_path(&Request::named(args.name)))
}
