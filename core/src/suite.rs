use std::{
    any::Any,
    collections::HashMap,
    fmt,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt as _};

use crate::{
    case::TestCase,
    error::{anyhow, CaseResult, MarksConfigError},
    marks::{MarkScheme, Marks},
    options::Options,
    result::TestResult,
};

/// Identity and metadata of one test.
#[derive(Debug, Clone, PartialEq)]
pub struct TestInfo {
    /// `<module>.<Class>.<method>`, or `<Class>.<method>` when the module name is empty.
    pub id: String,
    pub module: String,
    pub class: String,
    pub method: String,
    pub doc: Option<String>,
    pub marks: Option<Marks>,
    /// Run for its details only; never reported or marked.
    pub ignore_result: bool,
}

pub fn qualified_name(module: &str, name: &str) -> String {
    if module.is_empty() {
        name.to_owned()
    } else {
        format!("{}.{}", module, name)
    }
}

/// Shared state of a test class, built once per run before its first test.
#[async_trait]
pub trait Fixture: Send + Sync + Sized + 'static {
    async fn setup_class(options: &Options) -> anyhow::Result<Self>;

    async fn tear_down_class(&self, _options: &Options) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs before each test of the class.
    async fn setup(&self, _t: &mut TestCase) -> CaseResult {
        Ok(())
    }

    /// Runs after each test of the class, whatever the test's outcome.
    async fn tear_down(&self, _t: &mut TestCase) -> CaseResult {
        Ok(())
    }
}

#[async_trait]
impl Fixture for () {
    async fn setup_class(_options: &Options) -> anyhow::Result<Self> {
        Ok(())
    }
}

pub type TestFn<F> = for<'a> fn(&'a F, &'a mut TestCase) -> BoxFuture<'a, CaseResult>;

pub type ModuleHook = for<'a> fn(&'a Options) -> BoxFuture<'a, anyhow::Result<()>>;

pub struct TestMethod<F> {
    name: String,
    func: TestFn<F>,
    doc: Option<String>,
    marks: Option<Marks>,
    ignore_result: bool,
}

impl<F> TestMethod<F> {
    pub fn new(name: impl Into<String>, func: TestFn<F>) -> Self {
        Self {
            name: name.into(),
            func,
            doc: None,
            marks: None,
            ignore_result: false,
        }
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn marks(mut self, marks: Marks) -> Self {
        self.marks = Some(marks);
        self
    }

    pub fn ignore_result(mut self) -> Self {
        self.ignore_result = true;
        self
    }
}

pub struct TestClass<F> {
    name: String,
    timeout: Option<Duration>,
    marks: Option<Marks>,
    methods: Vec<TestMethod<F>>,
}

impl<F: Fixture> TestClass<F> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            marks: None,
            methods: Vec::new(),
        }
    }

    /// Default timeout for every process the class's tests spawn.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Marks for methods that declare none of their own.
    pub fn marks(mut self, marks: Marks) -> Self {
        self.marks = Some(marks);
        self
    }

    pub fn test(mut self, method: TestMethod<F>) -> Self {
        self.methods.push(method);
        self
    }
}

pub(crate) type ClassState = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) struct MethodMeta {
    pub name: String,
    pub doc: Option<String>,
    pub marks: Option<Marks>,
    pub ignore_result: bool,
}

/// A test class with its fixture type erased.
#[async_trait]
pub(crate) trait ClassRunner: Send + Sync {
    fn name(&self) -> &str;

    fn timeout(&self) -> Option<Duration>;

    fn methods(&self) -> Vec<MethodMeta>;

    async fn setup_class(&self, options: &Options) -> anyhow::Result<ClassState>;

    async fn tear_down_class(&self, state: &ClassState, options: &Options) -> anyhow::Result<()>;

    async fn setup(&self, state: &ClassState, t: &mut TestCase) -> CaseResult;

    async fn body(&self, state: &ClassState, method: usize, t: &mut TestCase) -> CaseResult;

    async fn tear_down(&self, state: &ClassState, t: &mut TestCase) -> CaseResult;
}

impl<F: Fixture> TestClass<F> {
    fn state<'a>(&self, state: &'a ClassState) -> anyhow::Result<&'a F> {
        state
            .downcast_ref::<F>()
            .ok_or_else(|| anyhow!("State of class {} has an unexpected type", self.name))
    }
}

#[async_trait]
impl<F: Fixture> ClassRunner for TestClass<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn methods(&self) -> Vec<MethodMeta> {
        self.methods
            .iter()
            .map(|m| MethodMeta {
                name: m.name.clone(),
                doc: m.doc.clone(),
                marks: m.marks.clone().or_else(|| self.marks.clone()),
                ignore_result: m.ignore_result,
            })
            .collect()
    }

    async fn setup_class(&self, options: &Options) -> anyhow::Result<ClassState> {
        let state: ClassState = Arc::new(F::setup_class(options).await?);
        Ok(state)
    }

    async fn tear_down_class(&self, state: &ClassState, options: &Options) -> anyhow::Result<()> {
        self.state(state)?.tear_down_class(options).await
    }

    async fn setup(&self, state: &ClassState, t: &mut TestCase) -> CaseResult {
        self.state(state)?.setup(t).await
    }

    async fn body(&self, state: &ClassState, method: usize, t: &mut TestCase) -> CaseResult {
        let func = self
            .methods
            .get(method)
            .map(|m| m.func)
            .ok_or_else(|| anyhow!("No method #{} in class {}", method, self.name))?;
        func(self.state(state)?, t).await
    }

    async fn tear_down(&self, state: &ClassState, t: &mut TestCase) -> CaseResult {
        self.state(state)?.tear_down(t).await
    }
}

/// A named group of test classes with optional one-time hooks.
pub struct TestModule {
    name: String,
    setup: Option<ModuleHook>,
    tear_down: Option<ModuleHook>,
    classes: Vec<Arc<dyn ClassRunner>>,
}

impl fmt::Debug for TestModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestModule")
            .field("name", &self.name)
            .field(
                "classes",
                &self.classes.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl TestModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            setup: None,
            tear_down: None,
            classes: Vec::new(),
        }
    }

    pub fn setup(mut self, hook: ModuleHook) -> Self {
        self.setup = Some(hook);
        self
    }

    pub fn tear_down(mut self, hook: ModuleHook) -> Self {
        self.tear_down = Some(hook);
        self
    }

    pub fn class<F: Fixture>(mut self, class: TestClass<F>) -> Self {
        self.classes.push(Arc::new(class));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.name()).collect()
    }

    pub(crate) fn find_class(&self, name: &str) -> Option<&Arc<dyn ClassRunner>> {
        self.classes.iter().find(|c| c.name() == name)
    }

    pub(crate) fn classes(&self) -> &[Arc<dyn ClassRunner>] {
        &self.classes
    }
}

/// One runnable test: a method of a class of a module.
#[derive(Clone)]
pub struct TestEntry {
    module: Arc<TestModule>,
    class: Arc<dyn ClassRunner>,
    method: usize,
    info: Arc<TestInfo>,
}

impl fmt::Debug for TestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<TestEntry {}>", self.info.id)
    }
}

impl TestEntry {
    pub(crate) fn new(module: Arc<TestModule>, class: Arc<dyn ClassRunner>, method: usize) -> Option<Self> {
        let meta = class.methods().into_iter().nth(method)?;
        let class_id = qualified_name(&module.name, class.name());
        let info = TestInfo {
            id: format!("{}.{}", class_id, meta.name),
            module: module.name.clone(),
            class: class.name().to_owned(),
            method: meta.name,
            doc: meta.doc,
            marks: meta.marks,
            ignore_result: meta.ignore_result,
        };
        Some(Self {
            module,
            class,
            method,
            info: Arc::new(info),
        })
    }

    pub fn info(&self) -> &TestInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    fn class_key(&self) -> String {
        qualified_name(&self.module.name, self.class.name())
    }
}

#[derive(Debug, Clone)]
pub enum SuiteItem {
    Test(TestEntry),
    Suite(TestSuite),
}

/// Ordered, nestable collection of tests.
#[derive(Debug, Clone, Default)]
pub struct TestSuite {
    items: Vec<SuiteItem>,
}

impl FromIterator<TestEntry> for TestSuite {
    fn from_iter<I: IntoIterator<Item = TestEntry>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().map(SuiteItem::Test).collect(),
        }
    }
}

impl FromIterator<TestSuite> for TestSuite {
    fn from_iter<I: IntoIterator<Item = TestSuite>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().map(SuiteItem::Suite).collect(),
        }
    }
}

async fn guard<T, Fut>(fut: Fut) -> anyhow::Result<T>
where
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => res,
        Err(panic) => Err(anyhow!("panicked: {}", crate::case::panic_message(&*panic))),
    }
}

impl TestSuite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_test(&mut self, entry: TestEntry) {
        self.items.push(SuiteItem::Test(entry));
    }

    pub fn add_suite(&mut self, suite: TestSuite) {
        self.items.push(SuiteItem::Suite(suite));
    }

    pub fn items(&self) -> &[SuiteItem] {
        &self.items
    }

    /// Every test in execution order, nesting removed.
    pub fn tests(&self) -> Vec<&TestEntry> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a TestEntry>) {
        for item in &self.items {
            match item {
                SuiteItem::Test(entry) => out.push(entry),
                SuiteItem::Suite(suite) => suite.collect_into(out),
            }
        }
    }

    pub fn count(&self) -> usize {
        self.tests().len()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tests().into_iter().map(TestEntry::id).collect()
    }

    /// Mark layout of every counted test; fails on inconsistent categories.
    pub fn mark_scheme(&self) -> Result<MarkScheme, MarksConfigError> {
        let tests = self.tests();
        MarkScheme::from_tests(
            tests
                .iter()
                .filter(|t| !t.info.ignore_result)
                .map(|t| (t.info.id.as_str(), t.info.marks.as_ref())),
        )
    }

    /// Runs every test once. Module and class setup run before their first test;
    /// all teardown hooks run at the end, classes first, in the order they were touched.
    pub async fn run(&self, result: &mut TestResult) {
        let options = result.options().clone();
        let mut states: HashMap<String, ClassState> = HashMap::new();
        let mut modules: HashMap<String, Arc<TestModule>> = HashMap::new();
        let mut classes: HashMap<String, Arc<dyn ClassRunner>> = HashMap::new();

        for entry in self.tests() {
            let module = &entry.module;
            if !result.module_setup_run(&module.name) {
                let ok = match module.setup {
                    Some(hook) => match guard(hook(&options)).await {
                        Ok(()) => true,
                        Err(e) => {
                            log::warn!("Setup of module '{}' failed: {:#}", module.name, e);
                            false
                        }
                    },
                    None => true,
                };
                result.add_module_setup(&module.name, ok);
                modules.insert(module.name.clone(), module.clone());
            }

            let class_key = entry.class_key();
            if !result.module_setup_failed(&module.name) && !result.class_setup_run(&class_key) {
                let ok = match guard(entry.class.setup_class(&options)).await {
                    Ok(state) => {
                        states.insert(class_key.clone(), state);
                        true
                    }
                    Err(e) => {
                        log::warn!("Setup of class '{}' failed: {:#}", class_key, e);
                        false
                    }
                };
                result.add_class_setup(&class_key, ok);
                classes.insert(class_key.clone(), entry.class.clone());
            }

            let skip_reason = if result.module_setup_failed(&module.name) {
                Some(format!("setup of module '{}' failed", module.name))
            } else if result.class_setup_failed(&class_key) {
                Some(format!("setup of class '{}' failed", class_key))
            } else {
                None
            };
            let state = match (skip_reason, states.get(&class_key)) {
                (None, Some(state)) => state.clone(),
                (reason, _) => {
                    if !entry.info.ignore_result {
                        let reason = reason.unwrap_or_else(|| "class state is missing".to_owned());
                        result.start_test(&entry.info);
                        result.add_skip(&entry.info, &reason);
                        result.stop_test(&entry.info);
                    }
                    continue;
                }
            };

            let mut case = TestCase::new(
                entry.info.clone(),
                options.clone(),
                result.console().clone(),
                entry.class.timeout(),
            );
            case.run(entry.class.as_ref(), &state, entry.method, result)
                .await;
        }

        for class_key in result.touched_classes() {
            let (Some(class), Some(state)) = (classes.get(class_key), states.get(class_key)) else {
                continue;
            };
            if let Err(e) = guard(class.tear_down_class(state, &options)).await {
                log::warn!("Teardown of class '{}' failed: {:#}", class_key, e);
                if !options.silent {
                    result
                        .console()
                        .println(format!("Error in teardown of class {}: {:#}", class_key, e));
                }
            }
        }

        for module_name in result.touched_modules() {
            let Some(hook) = modules.get(module_name).and_then(|m| m.tear_down) else {
                continue;
            };
            if let Err(e) = guard(hook(&options)).await {
                log::warn!("Teardown of module '{}' failed: {:#}", module_name, e);
                if !options.silent {
                    result
                        .console()
                        .println(format!("Error in teardown of module {}: {:#}", module_name, e));
                }
            }
        }
    }
}
