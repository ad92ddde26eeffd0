// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thin shim: init logging, parse args, build a plan, run it, map the
//! result to a process exit code.

mod cli;
mod error;
mod plan;
mod run;

use anyhow::Context;
use clap::Parser;
use log::error;

fn main() {
    env_logger::init();

    if let Err(e) = run_cli() {
        for (i, cause) in e.chain().enumerate() {
            if i == 0 {
                error!("{cause}");
            } else {
                error!("caused by: {cause}");
            }
        }
        std::process::exit(1);
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let built = plan::Plan::build(cli).context("building plan from arguments")?;
    run::execute(built).context("executing plan")?;
    Ok(())
}
