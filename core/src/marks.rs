use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{error::MarksConfigError, result::Outcome};

/// How a test contributes to its category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Award {
    /// This much is awarded when the test passes.
    PerTest(f64),
    /// The category is worth this much, shared evenly among its tests.
    Pool(f64),
}

/// Marking metadata attached to a test or a test class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marks {
    pub category: String,
    pub award: Award,
}

impl Marks {
    pub fn per_test(category: impl Into<String>, mark: f64) -> Self {
        Self {
            category: category.into(),
            award: Award::PerTest(mark),
        }
    }

    pub fn pool(category: impl Into<String>, category_marks: f64) -> Self {
        Self {
            category: category.into(),
            award: Award::Pool(category_marks),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Rule {
    Pool(f64),
    PerTest,
}

/// Validated category layout of a suite.
#[derive(Debug, Clone, Default)]
pub struct MarkScheme {
    rules: BTreeMap<String, Rule>,
    tests: HashMap<String, (String, Award)>,
}

impl MarkScheme {
    pub const UNCATEGORISED: &str = "";

    /// Checks every test's marks against the others in its category.
    /// Tests without marks join the uncategorised category worth nothing.
    pub fn from_tests<'a, I>(tests: I) -> Result<Self, MarksConfigError>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a Marks>)>,
    {
        let mut scheme = Self::default();
        for (id, marks) in tests {
            let (category, award) = match marks {
                Some(m) => (m.category.as_str(), m.award),
                None => (Self::UNCATEGORISED, Award::PerTest(0.0)),
            };
            let value = match award {
                Award::PerTest(v) | Award::Pool(v) => v,
            };
            if value < 0.0 || value.is_nan() {
                return Err(MarksConfigError::NegativeMark {
                    mark: value,
                    test: id.to_owned(),
                });
            }

            let rule = match award {
                Award::Pool(v) => Rule::Pool(v),
                Award::PerTest(_) => Rule::PerTest,
            };
            match (scheme.rules.get(category), rule) {
                (None, _) => {
                    scheme.rules.insert(category.to_owned(), rule);
                }
                (Some(Rule::Pool(first)), Rule::Pool(second)) if *first != second => {
                    return Err(MarksConfigError::DifferingPool {
                        category: category.to_owned(),
                        first: *first,
                        second,
                        test: id.to_owned(),
                    })
                }
                (Some(Rule::Pool(_)), Rule::PerTest) | (Some(Rule::PerTest), Rule::Pool(_)) => {
                    return Err(MarksConfigError::MixedCategory {
                        category: category.to_owned(),
                        test: id.to_owned(),
                    })
                }
                _ => {}
            }
            scheme
                .tests
                .insert(id.to_owned(), (category.to_owned(), award));
        }
        Ok(scheme)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    fn lookup(&self, test_id: &str) -> (&str, Award) {
        match self.tests.get(test_id) {
            Some((category, award)) => (category, *award),
            None => (Self::UNCATEGORISED, Award::PerTest(0.0)),
        }
    }
}

/// Marks for one category once the run is over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryReport {
    /// Pool value, 0 for a per-test category.
    pub category_marks: f64,
    /// Sum of per-test marks, 0 for a pool category.
    pub total_marks: f64,
    /// Outcomes in completion order.
    pub tests: Vec<Outcome>,
    pub passed: usize,
    pub mark: f64,
}

impl CategoryReport {
    /// Marks this category is worth.
    pub fn possible(&self) -> f64 {
        if self.category_marks > 0.0 {
            self.category_marks
        } else {
            self.total_marks
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub passed: usize,
    pub test_count: usize,
    pub received_marks: f64,
    pub total_marks: f64,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    outcomes: Vec<Outcome>,
    per_test_total: f64,
    per_test_received: f64,
}

/// Per-category tally of outcomes.
#[derive(Debug, Clone, Default)]
pub struct MarkSheet {
    scheme: MarkScheme,
    entries: BTreeMap<String, Entry>,
}

impl MarkSheet {
    pub fn new(scheme: MarkScheme) -> Self {
        Self {
            scheme,
            entries: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, test_id: &str, outcome: Outcome) {
        let (category, award) = self.scheme.lookup(test_id);
        let entry = self.entries.entry(category.to_owned()).or_default();
        entry.outcomes.push(outcome);
        if let Award::PerTest(mark) = award {
            entry.per_test_total += mark;
            if outcome == Outcome::Success {
                entry.per_test_received += mark;
            }
        }
    }

    /// Every category of the scheme plus any category that recorded a test.
    pub fn report(&self) -> (BTreeMap<String, CategoryReport>, Totals) {
        let empty = Entry::default();
        let mut names: Vec<&str> = self.scheme.categories().collect();
        names.extend(self.entries.keys().map(String::as_str));
        names.sort_unstable();
        names.dedup();

        let mut totals = Totals::default();
        let mut reports = BTreeMap::new();
        for name in names {
            if name == MarkScheme::UNCATEGORISED && !self.entries.contains_key(name) {
                continue;
            }
            let entry = self.entries.get(name).unwrap_or(&empty);
            let count = entry.outcomes.len();
            let passed = entry
                .outcomes
                .iter()
                .filter(|&&o| o == Outcome::Success)
                .count();

            let report = match self.scheme.rules.get(name) {
                Some(Rule::Pool(pool)) => CategoryReport {
                    category_marks: *pool,
                    total_marks: 0.0,
                    tests: entry.outcomes.clone(),
                    passed,
                    mark: if count == 0 {
                        0.0
                    } else {
                        pool * passed as f64 / count as f64
                    },
                },
                _ => CategoryReport {
                    category_marks: 0.0,
                    total_marks: entry.per_test_total,
                    tests: entry.outcomes.clone(),
                    passed,
                    mark: entry.per_test_received,
                },
            };

            totals.passed += passed;
            totals.test_count += count;
            totals.received_marks += report.mark;
            totals.total_marks += report.possible();
            reports.insert(name.to_owned(), report);
        }
        (reports, totals)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scheme(tests: &[(&str, Option<Marks>)]) -> Result<MarkScheme, MarksConfigError> {
        MarkScheme::from_tests(tests.iter().map(|(id, m)| (*id, m.as_ref())))
    }

    #[test]
    fn pool_is_shared_by_passed_fraction() {
        let s = scheme(&[
            ("T.a", Some(Marks::pool("numargs", 3.0))),
            ("T.b", Some(Marks::pool("numargs", 3.0))),
            ("T.c", Some(Marks::pool("numargs", 3.0))),
            ("T.d", Some(Marks::pool("numargs", 3.0))),
        ])
        .unwrap();
        let mut sheet = MarkSheet::new(s);
        sheet.record("T.a", Outcome::Success);
        sheet.record("T.b", Outcome::Failure);
        sheet.record("T.c", Outcome::Success);
        sheet.record("T.d", Outcome::Error);

        let (reports, totals) = sheet.report();
        let r = dbg!(&reports["numargs"]);
        assert_eq!(r.passed, 2);
        assert!((r.mark - 1.5).abs() < 1e-9);
        assert_eq!(r.category_marks, 3.0);
        assert_eq!(
            r.tests,
            vec![
                Outcome::Success,
                Outcome::Failure,
                Outcome::Success,
                Outcome::Error
            ]
        );
        assert_eq!(totals.test_count, 4);
        assert_eq!(totals.total_marks, 3.0);
    }

    #[test]
    fn per_test_marks_sum_passed_tests() {
        let s = scheme(&[
            ("T.a", Some(Marks::per_test("play", 1.0))),
            ("T.b", Some(Marks::per_test("play", 2.5))),
            ("T.c", Some(Marks::per_test("play", 4.0))),
            ("T.u", None),
        ])
        .unwrap();
        let mut sheet = MarkSheet::new(s);
        sheet.record("T.a", Outcome::Failure);
        sheet.record("T.b", Outcome::Success);
        sheet.record("T.c", Outcome::Success);
        sheet.record("T.u", Outcome::Success);

        let (reports, totals) = sheet.report();
        assert_eq!(reports["play"].mark, 6.5);
        assert_eq!(reports["play"].total_marks, 7.5);
        assert_eq!(reports[""].mark, 0.0);
        assert_eq!(reports[""].passed, 1);
        assert_eq!(
            totals,
            Totals {
                passed: 3,
                test_count: 4,
                received_marks: 6.5,
                total_marks: 7.5,
            }
        );
    }

    #[test]
    fn skipped_tests_count_as_not_passed() {
        let s = scheme(&[
            ("T.a", Some(Marks::pool("c", 2.0))),
            ("T.b", Some(Marks::pool("c", 2.0))),
        ])
        .unwrap();
        let mut sheet = MarkSheet::new(s);
        sheet.record("T.a", Outcome::Skipped);
        sheet.record("T.b", Outcome::Skipped);
        let (reports, totals) = sheet.report();
        assert_eq!(reports["c"].mark, 0.0);
        assert_eq!(totals.test_count, 2);
        assert_eq!(totals.total_marks, 2.0);
    }

    #[test]
    fn category_without_tests_does_not_divide_by_zero() {
        let s = scheme(&[("T.a", Some(Marks::pool("never_run", 5.0)))]).unwrap();
        let (reports, totals) = MarkSheet::new(s).report();
        assert_eq!(reports["never_run"].mark, 0.0);
        assert_eq!(reports["never_run"].passed, 0);
        assert!(!reports.contains_key(""));
        assert_eq!(totals.received_marks, 0.0);
    }

    #[test]
    fn invalid_schemes_are_rejected() {
        struct X {
            tests: Vec<(&'static str, Option<Marks>)>,
            want: MarksConfigError,
        }
        let cases = vec![
            X {
                tests: vec![
                    ("T.a", Some(Marks::pool("c", 2.0))),
                    ("T.b", Some(Marks::per_test("c", 1.0))),
                ],
                want: MarksConfigError::MixedCategory {
                    category: "c".into(),
                    test: "T.b".into(),
                },
            },
            X {
                tests: vec![
                    ("T.a", Some(Marks::per_test("c", 1.0))),
                    ("T.b", Some(Marks::pool("c", 2.0))),
                ],
                want: MarksConfigError::MixedCategory {
                    category: "c".into(),
                    test: "T.b".into(),
                },
            },
            X {
                tests: vec![
                    ("T.a", Some(Marks::pool("c", 2.0))),
                    ("T.b", Some(Marks::pool("c", 3.0))),
                ],
                want: MarksConfigError::DifferingPool {
                    category: "c".into(),
                    first: 2.0,
                    second: 3.0,
                    test: "T.b".into(),
                },
            },
            X {
                tests: vec![("T.a", Some(Marks::per_test("c", -1.0)))],
                want: MarksConfigError::NegativeMark {
                    mark: -1.0,
                    test: "T.a".into(),
                },
            },
        ];
        for x in cases {
            let tests: Vec<_> = x.tests.iter().map(|(id, m)| (*id, m.clone())).collect();
            assert_eq!(dbg!(scheme(&tests)).unwrap_err(), x.want);
        }
    }
}
