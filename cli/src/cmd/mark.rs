use std::path::{Path, PathBuf};

use anyhow::Context as _;
use marks_core::{
    marking::{self, BatchMarker},
    style::Console,
    CleanupPolicy, Mode, Registry, Runner,
};

use super::{CommonArgs, Exit, GlobalArgs, SubcmdResult};
use crate::util;

#[derive(Debug, clap::Args)]
pub struct Args {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Report each test while marking
    #[arg(short, long)]
    pub verbose: bool,

    /// Mark every submission directory inside DIR
    #[arg(short, long, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Submissions marked at the same time [default: from marks.toml, else 4]
    #[arg(short, long)]
    pub processes: Option<usize>,

    /// Save the output of every process
    #[arg(short, long)]
    pub save: bool,

    /// Mark the working directory as one submission of a batch
    #[arg(long, hide = true, conflicts_with = "directory")]
    pub worker: bool,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs, registry: &Registry) -> SubcmdResult {
    let (cfg, mut options) = super::prepare(global_args, &args.common)?;
    let suite = super::load(registry, &args.common.tests)?;
    if args.save {
        options.mode = Mode::Save;
        options.cleanup = CleanupPolicy::Never;
    }

    if args.worker {
        let dir = options.working_dir.clone();
        marking::mark_submission(&dir, &suite, &options, &cfg.marking, Console::stdout()).await?;
        return Ok(());
    }

    if let Some(directory) = &args.directory {
        let program = std::env::current_exe().context("Cannot locate the test program")?;
        let mut marker = BatchMarker::new(
            util::absolute(directory),
            program,
            worker_args(args, &options.tests_dir()),
            cfg.marking.clone(),
        );
        if let Some(processes) = args.processes {
            marker = marker.processes(processes);
        }
        let summary = marker.run().await?;
        println!(
            "Marked {} submissions, {} failed",
            summary.documents.len(),
            summary.failed.len()
        );
        for submission in &summary.failed {
            eprintln!("Failed to mark {}, see its {}", submission, cfg.marking.log_file);
        }
        if summary.interrupted {
            return Err(Exit::Interrupted.into());
        }
        return Ok(());
    }

    options.verbose = args.verbose;
    let result = Runner::new(options).run_marking(&suite).await?;
    super::finish(&result, false)
}

/// Command line of the worker started in each submission directory.
/// Fixtures stay where this process found them, not in the submission.
fn worker_args(args: &Args, tests_dir: &Path) -> Vec<String> {
    let mut argv = vec!["mark".to_owned(), "--worker".to_owned()];
    if args.save {
        argv.push("--save".to_owned());
    }
    argv.push("--tests-dir".to_owned());
    argv.push(tests_dir.display().to_string());
    for opt in &args.common.options {
        argv.push("-o".to_owned());
        argv.push(opt.clone());
    }
    argv.push("--".to_owned());
    argv.extend(args.common.tests.iter().cloned());
    argv
}
