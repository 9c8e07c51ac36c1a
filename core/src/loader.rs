use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use crate::suite::{ClassRunner, TestEntry, TestModule, TestSuite};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("No test matches '{0}'")]
    NoMatch(String),

    #[error("Class '{class}' has no test method '{method}'")]
    UnknownMethod { class: String, method: String },

    #[error("'{name}' is ambiguous, it names a class in several modules: {}", .modules.join(", "))]
    Ambiguous { name: String, modules: Vec<String> },

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Cannot make a test from '{0}'")]
    Unresolvable(String),
}

pub type SuiteFactory = fn(&Loader<'_>) -> Result<TestSuite, LoadError>;

/// Every test module a program knows, plus named suites built on demand.
#[derive(Default)]
pub struct Registry {
    modules: Vec<Arc<TestModule>>,
    suites: BTreeMap<String, SuiteFactory>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.modules)
            .field("suites", &self.suites.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, module: TestModule) -> Self {
        self.modules.push(Arc::new(module));
        self
    }

    /// Registers a suite built by `factory` when `name` is asked for.
    pub fn suite(mut self, name: impl Into<String>, factory: SuiteFactory) -> Self {
        self.suites.insert(name.into(), factory);
        self
    }

    pub fn modules(&self) -> &[Arc<TestModule>] {
        &self.modules
    }

    pub fn suite_names(&self) -> impl Iterator<Item = &str> {
        self.suites.keys().map(String::as_str)
    }
}

fn is_pattern(name: &str) -> bool {
    name.contains(['*', '?', '['])
}

/// Turns names given on the command line into suites.
#[derive(Debug, Clone, Copy)]
pub struct Loader<'r> {
    registry: &'r Registry,
    test_method_prefix: &'r str,
    default_test_method: &'r str,
}

impl<'r> Loader<'r> {
    pub const TEST_METHOD_PREFIX: &'static str = "test";
    pub const DEFAULT_TEST_METHOD: &'static str = "run_test";

    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            test_method_prefix: Self::TEST_METHOD_PREFIX,
            default_test_method: Self::DEFAULT_TEST_METHOD,
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Every test of every module, or of `names` when given.
    pub fn load<S: AsRef<str>>(&self, names: &[S]) -> Result<TestSuite, LoadError> {
        if names.is_empty() {
            Ok(self.load_all())
        } else {
            self.load_tests_from_names(names)
        }
    }

    pub fn load_all(&self) -> TestSuite {
        self.registry
            .modules
            .iter()
            .map(|m| self.load_tests_from_module(m))
            .collect()
    }

    /// One suite per class, classes in name order.
    pub fn load_tests_from_module(&self, module: &Arc<TestModule>) -> TestSuite {
        let mut classes: Vec<_> = module.classes().iter().collect();
        classes.sort_by(|a, b| a.name().cmp(b.name()));
        classes
            .into_iter()
            .map(|class| self.load_tests_from_class(module, class))
            .collect()
    }

    /// Methods starting with the test prefix in name order, else the default method.
    pub(crate) fn load_tests_from_class(
        &self,
        module: &Arc<TestModule>,
        class: &Arc<dyn ClassRunner>,
    ) -> TestSuite {
        let methods = class.methods();
        let mut picked: Vec<usize> = methods
            .iter()
            .enumerate()
            .filter(|(_, m)| m.name.starts_with(self.test_method_prefix))
            .map(|(i, _)| i)
            .collect();
        if picked.is_empty() {
            picked = methods
                .iter()
                .position(|m| m.name == self.default_test_method)
                .into_iter()
                .collect();
        }
        picked.sort_by(|&a, &b| methods[a].name.cmp(&methods[b].name));
        picked
            .into_iter()
            .filter_map(|i| TestEntry::new(module.clone(), class.clone(), i))
            .collect()
    }

    fn load_method(
        &self,
        module: &Arc<TestModule>,
        class: &Arc<dyn ClassRunner>,
        method: &str,
    ) -> Result<TestSuite, LoadError> {
        class
            .methods()
            .iter()
            .position(|m| m.name == method)
            .and_then(|i| TestEntry::new(module.clone(), class.clone(), i))
            .map(|entry| std::iter::once(entry).collect())
            .ok_or_else(|| LoadError::UnknownMethod {
                class: class.name().to_owned(),
                method: method.to_owned(),
            })
    }

    fn load_path(
        &self,
        name: &str,
        module: &Arc<TestModule>,
        path: &[&str],
    ) -> Result<TestSuite, LoadError> {
        match path {
            [] => Ok(self.load_tests_from_module(module)),
            [class, rest @ ..] => {
                let Some(class) = module.find_class(class) else {
                    return Err(LoadError::NoMatch(name.to_owned()));
                };
                match rest {
                    [] => Ok(self.load_tests_from_class(module, class)),
                    [method] => self.load_method(module, class, method),
                    _ => Err(LoadError::Unresolvable(name.to_owned())),
                }
            }
        }
    }

    /// Resolves a suite name, module, `module.Class`, `module.Class.method`,
    /// a bare `Class` or `Class.method`, or a wildcard pattern over test ids.
    pub fn load_tests_from_name(&self, name: &str) -> Result<TestSuite, LoadError> {
        if let Some(factory) = self.registry.suites.get(name) {
            return factory(self);
        }
        if is_pattern(name) {
            return self.load_matching(name);
        }

        let module = self
            .registry
            .modules
            .iter()
            .filter(|m| {
                !m.name().is_empty()
                    && (name == m.name()
                        || name
                            .strip_prefix(m.name())
                            .is_some_and(|rest| rest.starts_with('.')))
            })
            .max_by_key(|m| m.name().len());
        if let Some(module) = module {
            let path: Vec<&str> = name[module.name().len()..]
                .split('.')
                .filter(|s| !s.is_empty())
                .collect();
            return self.load_path(name, module, &path);
        }

        let path: Vec<&str> = name.split('.').collect();
        let owners: Vec<&Arc<TestModule>> = self
            .registry
            .modules
            .iter()
            .filter(|m| m.find_class(path[0]).is_some())
            .collect();
        match owners.as_slice() {
            [] => Err(LoadError::NoMatch(name.to_owned())),
            [owner] => self.load_path(name, owner, &path),
            _ => Err(LoadError::Ambiguous {
                name: path[0].to_owned(),
                modules: owners.iter().map(|m| m.name().to_owned()).collect(),
            }),
        }
    }

    fn load_matching(&self, pattern: &str) -> Result<TestSuite, LoadError> {
        let compiled = glob::Pattern::new(pattern).map_err(|source| LoadError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        let all = self.load_all();
        let suite: TestSuite = all
            .tests()
            .into_iter()
            .filter(|t| compiled.matches(t.id()))
            .cloned()
            .collect();
        if suite.count() == 0 {
            return Err(LoadError::NoMatch(pattern.to_owned()));
        }
        Ok(suite)
    }

    /// Tests named by several entries are kept once, where they first appear.
    pub fn load_tests_from_names<S: AsRef<str>>(&self, names: &[S]) -> Result<TestSuite, LoadError> {
        let mut seen = HashSet::new();
        let mut tests = Vec::new();
        for name in names {
            let suite = self.load_tests_from_name(name.as_ref())?;
            tests.extend(
                suite
                    .tests()
                    .into_iter()
                    .filter(|t| seen.insert(t.id().to_owned()))
                    .cloned(),
            );
        }
        Ok(tests.into_iter().collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{case::TestCase, error::CaseResult, suite::TestClass, suite::TestMethod};
    use futures::{future::BoxFuture, FutureExt as _};

    fn noop<'a>(_: &'a (), _: &'a mut TestCase) -> BoxFuture<'a, CaseResult> {
        async { Ok(()) }.boxed()
    }

    fn registry() -> Registry {
        Registry::new()
            .module(
                TestModule::new("ass1")
                    .class(
                        TestClass::<()>::new("Usage")
                            .test(TestMethod::new("test_usage_b", noop))
                            .test(TestMethod::new("test_usage_a", noop))
                            .test(TestMethod::new("helper", noop)),
                    )
                    .class(TestClass::<()>::new("Single").test(TestMethod::new("run_test", noop)))
                    .class(TestClass::<()>::new("Shared").test(TestMethod::new("test_x", noop))),
            )
            .module(
                TestModule::new("ass1.extra")
                    .class(TestClass::<()>::new("Game").test(TestMethod::new("test_play", noop))),
            )
            .module(
                TestModule::new("other")
                    .class(TestClass::<()>::new("Shared").test(TestMethod::new("test_y", noop))),
            )
            .suite("quick", |loader| {
                loader.load_tests_from_names(&["ass1.Usage.test_usage_a", "Game"][..])
            })
    }

    #[test]
    fn names_resolve() {
        struct X {
            names: Vec<&'static str>,
            want: Vec<&'static str>,
        }
        let cases = vec![
            X {
                names: vec![],
                want: vec![
                    "ass1.Shared.test_x",
                    "ass1.Single.run_test",
                    "ass1.Usage.test_usage_a",
                    "ass1.Usage.test_usage_b",
                    "ass1.extra.Game.test_play",
                    "other.Shared.test_y",
                ],
            },
            X {
                names: vec!["ass1.Usage"],
                want: vec!["ass1.Usage.test_usage_a", "ass1.Usage.test_usage_b"],
            },
            X {
                names: vec!["ass1.Usage.helper"],
                want: vec!["ass1.Usage.helper"],
            },
            X {
                names: vec!["ass1.extra"],
                want: vec!["ass1.extra.Game.test_play"],
            },
            X {
                names: vec!["Game.test_play", "Single"],
                want: vec!["ass1.extra.Game.test_play", "ass1.Single.run_test"],
            },
            X {
                names: vec!["ass1.Usage.test_usage*"],
                want: vec!["ass1.Usage.test_usage_a", "ass1.Usage.test_usage_b"],
            },
            X {
                names: vec!["quick"],
                want: vec!["ass1.Usage.test_usage_a", "ass1.extra.Game.test_play"],
            },
            X {
                names: vec!["ass1.Usage", "ass1.Usage.test_usage_a"],
                want: vec!["ass1.Usage.test_usage_a", "ass1.Usage.test_usage_b"],
            },
            X {
                names: vec!["ass1.Usage.test_usage_b", "ass1.Usage.test_*", "Usage"],
                want: vec!["ass1.Usage.test_usage_b", "ass1.Usage.test_usage_a"],
            },
        ];
        let registry = registry();
        let loader = Loader::new(&registry);
        for x in cases {
            let suite = loader.load(&x.names[..]).unwrap();
            assert_eq!(dbg!(suite.ids()), x.want);
        }
    }

    #[test]
    fn bad_names_are_errors() {
        let registry = registry();
        let loader = Loader::new(&registry);
        assert!(matches!(
            loader.load_tests_from_name("Nope"),
            Err(LoadError::NoMatch(_))
        ));
        assert!(matches!(
            loader.load_tests_from_name("ass1.Usage.test_missing"),
            Err(LoadError::UnknownMethod { .. })
        ));
        assert!(matches!(
            loader.load_tests_from_name("Shared"),
            Err(LoadError::Ambiguous { .. })
        ));
        assert!(matches!(
            loader.load_tests_from_name("zzz*"),
            Err(LoadError::NoMatch(_))
        ));
        assert!(matches!(
            loader.load_tests_from_name("ass1.Usage.test_usage_a.more"),
            Err(LoadError::Unresolvable(_))
        ));
        let err = loader.load_tests_from_name("Shared").unwrap_err();
        assert_eq!(
            err.to_string(),
            "'Shared' is ambiguous, it names a class in several modules: ass1, other"
        );
    }
}
