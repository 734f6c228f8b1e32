use anyhow::Result;
use clap::Args;
use netvol::{Request, VolumePlugin};

use crate::cli::{GlobalFlags, print_response};

#[derive(Args, Debug)]
pub struct CapabilitiesArgs {}

pub fn execute(_args: CapabilitiesArgs, global: &GlobalFlags) -> Result<()> {
    let driver = global.create_driver()?;
    print_response(&driver.handle_capabilities(&Request::default()))
}
