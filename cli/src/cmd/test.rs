use marks_core::{CleanupPolicy, Mode, Options, Registry, Runner};

use super::{ArgCleanup, CommonArgs, GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Show a diff for output mismatches (only when tests are named)
    #[arg(short, long)]
    pub verbose: bool,

    /// Save the output of every process and keep the scratch directory
    #[arg(short, long)]
    pub save: bool,

    /// When to delete the scratch directory
    #[arg(long, value_enum)]
    pub cleanup: Option<ArgCleanup>,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs, registry: &Registry) -> SubcmdResult {
    let (_, mut options) = super::prepare(global_args, &args.common)?;
    let suite = super::load(registry, &args.common.tests)?;
    apply(args, &mut options);

    let result = Runner::new(options).run(&suite).await?;
    super::finish(&result, true)
}

fn apply(args: &Args, options: &mut Options) {
    options.verbose = true;
    if args.verbose {
        if args.common.tests.is_empty() {
            println!("WARNING: Verbose mode ignored as no tests specified.");
        } else {
            options.show_diff = true;
        }
    }
    if let Some(cleanup) = args.cleanup {
        options.cleanup = cleanup.into();
    }
    if args.save {
        options.mode = Mode::Save;
        options.cleanup = CleanupPolicy::Never;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(tests: &[&str], verbose: bool, save: bool) -> Args {
        Args {
            common: CommonArgs {
                tests: tests.iter().map(|s| s.to_string()).collect(),
                options: vec![],
                tests_dir: None,
            },
            verbose,
            save,
            cleanup: None,
        }
    }

    #[test]
    fn flags_become_options() {
        struct X {
            args: Args,
            show_diff: bool,
            mode: Mode,
            cleanup: CleanupPolicy,
        }
        let cases = vec![
            X {
                args: args(&[], true, false),
                show_diff: false,
                mode: Mode::Normal,
                cleanup: CleanupPolicy::OnSuccess,
            },
            X {
                args: args(&["Usage"], true, false),
                show_diff: true,
                mode: Mode::Normal,
                cleanup: CleanupPolicy::OnSuccess,
            },
            X {
                args: Args {
                    cleanup: Some(ArgCleanup::Always),
                    ..args(&[], false, true)
                },
                show_diff: false,
                mode: Mode::Save,
                cleanup: CleanupPolicy::Never,
            },
            X {
                args: Args {
                    cleanup: Some(ArgCleanup::Always),
                    ..args(&[], false, false)
                },
                show_diff: false,
                mode: Mode::Normal,
                cleanup: CleanupPolicy::Always,
            },
        ];
        for x in cases {
            let mut options = Options::new("/w");
            apply(dbg!(&x.args), &mut options);
            assert!(options.verbose);
            assert_eq!(options.show_diff, x.show_diff);
            assert_eq!(options.mode, x.mode);
            assert_eq!(options.cleanup, x.cleanup);
        }
    }
}
