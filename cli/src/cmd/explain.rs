use marks_core::{Mode, Registry, Runner};

use super::{CommonArgs, GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    #[command(flatten)]
    pub common: CommonArgs,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs, registry: &Registry) -> SubcmdResult {
    let (_, options) = super::prepare(global_args, &args.common)?;
    let suite = super::load(registry, &args.common.tests)?;

    let result = Runner::new(options.mode(Mode::Explain)).run(&suite).await?;
    super::finish(&result, false)
}
