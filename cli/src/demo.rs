//! Tests for `demo/upper.sh`, a filter that upper-cases its input.
//! Run from `cli/demo`, e.g. `marks-demo test` or `marks-demo mark -d submissions`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt as _};
use marks_core::{
    CaseResult, Fixture, Marks, Options, Registry, TestCase, TestClass, TestMethod, TestModule,
};

/// The program under test and where to find it.
struct Upper {
    prog: String,
}

#[async_trait]
impl Fixture for Upper {
    async fn setup_class(options: &Options) -> anyhow::Result<Self> {
        let scratch = options.scratch_dir();
        if scratch != options.working_dir {
            fsutil::symlink(options.tests_dir(), scratch.join("tests"))?;
        }
        let prog = match options.option("prog") {
            Some(prog) => options.working_dir.join(prog),
            None => options.working_dir.join("upper.sh"),
        };
        Ok(Self {
            prog: prog.display().to_string(),
        })
    }
}

fn test_help<'a>(u: &'a Upper, t: &'a mut TestCase) -> BoxFuture<'a, CaseResult> {
    async move {
        let p = t.process(["sh", u.prog.as_str(), "-h"])?;
        t.assert_stderr_matches_file(p, "tests/help.err").await?;
        t.assert_stdout(p, "").await?;
        t.assert_exit_status(p, 1).await
    }
    .boxed()
}

fn test_missing_file<'a>(u: &'a Upper, t: &'a mut TestCase) -> BoxFuture<'a, CaseResult> {
    async move {
        let p = t.process(["sh", u.prog.as_str(), "nope.txt"])?;
        t.assert_stderr_matches_file(p, "tests/missing.err").await?;
        t.assert_exit_status(p, 2).await
    }
    .boxed()
}

fn test_file<'a>(u: &'a Upper, t: &'a mut TestCase) -> BoxFuture<'a, CaseResult> {
    async move {
        let p = t.process(["sh", u.prog.as_str(), "tests/words.in"])?;
        t.assert_stdout_matches_file(p, "tests/words.out").await?;
        t.assert_exit_status(p, 0).await
    }
    .boxed()
}

fn test_stdin<'a>(u: &'a Upper, t: &'a mut TestCase) -> BoxFuture<'a, CaseResult> {
    async move {
        let p = t.process_with_input(["sh", u.prog.as_str()], "tests/words.in")?;
        t.assert_stdout_matches_file(p, "tests/words.out").await?;
        t.assert_exit_status(p, 0).await
    }
    .boxed()
}

fn test_typed_input<'a>(u: &'a Upper, t: &'a mut TestCase) -> BoxFuture<'a, CaseResult> {
    async move {
        let p = t.process(["sh", u.prog.as_str()])?;
        t.send(p, "hello\n").await?;
        t.send(p, "world\n").await?;
        // tr only flushes at end of input
        t.finish_input(p);
        t.assert_stdout(p, "HELLO\nWORLD\n").await?;
        t.assert_exit_status(p, 0).await
    }
    .boxed()
}

fn test_terminated<'a>(u: &'a Upper, t: &'a mut TestCase) -> BoxFuture<'a, CaseResult> {
    async move {
        let p = t.process(["sh", u.prog.as_str()])?;
        t.delay(0.2).await;
        t.send_signal_group(p, libc::SIGTERM)?;
        t.assert_signal(p, libc::SIGTERM).await
    }
    .boxed()
}

fn count_lines<'a>(_: &'a Upper, t: &'a mut TestCase) -> BoxFuture<'a, CaseResult> {
    async move {
        let words = fsutil::read_to_string(t.path("tests/words.in"))?;
        t.add_detail("input_lines", words.lines().count());
        Ok(())
    }
    .boxed()
}

pub fn registry() -> Registry {
    Registry::new()
        .module(
            TestModule::new("upper")
                .class(
                    TestClass::<Upper>::new("Usage")
                        .timeout(Duration::from_secs(5))
                        .marks(Marks::pool("usage", 2.0))
                        .test(
                            TestMethod::new("test_help", test_help)
                                .doc("Check the usage message printed for -h."),
                        )
                        .test(
                            TestMethod::new("test_missing_file", test_missing_file)
                                .doc("Check the error for an unreadable file."),
                        ),
                )
                .class(
                    TestClass::<Upper>::new("Convert")
                        .timeout(Duration::from_secs(5))
                        .marks(Marks::per_test("convert", 1.0))
                        .test(TestMethod::new("test_file", test_file))
                        .test(TestMethod::new("test_stdin", test_stdin))
                        .test(
                            TestMethod::new("test_typed_input", test_typed_input)
                                .marks(Marks::per_test("convert", 2.0)),
                        )
                        .test(
                            TestMethod::new("test_terminated", test_terminated)
                                .doc("The filter dies on SIGTERM.")
                                .marks(Marks::per_test("signals", 1.0)),
                        )
                        .test(TestMethod::new("test_count_lines", count_lines).ignore_result()),
                ),
        )
        .suite("quick", |loader| {
            loader.load_tests_from_names(&["upper.Usage.test_help", "Convert.test_file"][..])
        })
}
