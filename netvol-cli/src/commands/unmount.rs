use anyhow::Result;
use clap::Args;
use netvol::{MountRequest, VolumePlugin};

use crate::cli::{GlobalFlags, print_response};

#[derive(Args, Debug)]
pub struct UnmountArgs {
    /// Volume name
    pub name: String,

    /// Mount id of the caller (logged only)
    #[arg(long)]
    pub id: Option<String>,
}

pub fn execute(args: UnmountArgs, global: &GlobalFlags) -> Result<()> {
    let driver = global.create_driver()?;
    let request = MountRequest {
        name: args.name,
        id: args.id.unwrap_or_default(),
    };
    print_response(&driver.handle_unmount(&request))
}
