use anyhow::Result;
use clap::Args;
use netvol::{Request, VolumePlugin};

use crate::cli::{GlobalFlags, parse_options, print_response};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Volume name
    pub name: String,

    /// Driver option (KEY=VALUE), e.g. from=<volume> or fromSnapshot=<snapshot>
    #[arg(short = 'o', long = "opt")]
    pub opts: Vec<String>,
}

pub fn execute(args: CreateArgs, global: &GlobalFlags) -> Result<()> {
    let opts = parse_options(&args.opts)?;
    let driver = global.create_driver()?;

    let request = Request::named(args.name).with_opts(opts);
    print_response(&driver.handle_create(&request))
}
