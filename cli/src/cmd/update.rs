use marks_core::{Registry, Runner};

use super::{CommonArgs, GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Do not ask for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs, registry: &Registry) -> SubcmdResult {
    let (_, mut options) = super::prepare(global_args, &args.common)?;
    let suite = super::load(registry, &args.common.tests)?;
    options.assume_yes = args.yes;

    match Runner::new(options).run_update(&suite).await? {
        Some(result) => super::finish(&result, false),
        None => {
            println!("Update cancelled, no files were changed.");
            Ok(())
        }
    }
}
