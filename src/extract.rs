use crate::data::{InternshipIndex, LocationIndex, PeriodIndex, PlacementRun, StudentIndex};
use crate::normalize::Problem;
use itertools::Itertools;
use std::fmt;

/// Where a student sits during one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub internship: InternshipIndex,
    pub location: LocationIndex,
}

/// Week-by-week placement of every student: `rows[student][period]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseAssignment {
    pub rows: Vec<Vec<Slot>>,
}

/// A run in index space; see [`PlacementRun`] for the named form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub student: StudentIndex,
    pub internship: InternshipIndex,
    pub location: LocationIndex,
    pub start: PeriodIndex,
    pub duration: usize,
}

impl Run {
    pub fn to_placement(self, problem: &Problem) -> PlacementRun {
        PlacementRun {
            student: problem.students[self.student].clone(),
            start_period: problem.periods[self.start].clone(),
            duration: self.duration,
            location: problem.location_names[self.location].clone(),
            internship_index: self.internship,
        }
    }
}

/// A hard constraint the assignment breaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Shape { students: usize, periods: usize },
    Quota {
        student: StudentIndex,
        internship: InternshipIndex,
        expected: u64,
        actual: u64,
    },
    Capacity {
        period: PeriodIndex,
        location: LocationIndex,
        capacity: u64,
        occupancy: u64,
    },
    UnknownSlot { student: StudentIndex, period: PeriodIndex },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Shape { students, periods } => {
                write!(f, "assignment is not {students} x {periods}")
            }
            Violation::Quota {
                student,
                internship,
                expected,
                actual,
            } => write!(
                f,
                "student {student} spends {actual} periods in internship {internship}, expected {expected}"
            ),
            Violation::Capacity {
                period,
                location,
                capacity,
                occupancy,
            } => write!(
                f,
                "location {location} holds {occupancy} students in period {period}, capacity {capacity}"
            ),
            Violation::UnknownSlot { student, period } => {
                write!(f, "student {student} has an invalid slot in period {period}")
            }
        }
    }
}

impl DenseAssignment {
    /// Checks quota and capacity for every student and period.
    ///
    /// Exactly-one-per-period holds structurally: a row has one slot per period.
    pub fn verify(&self, problem: &Problem) -> Result<(), Violation> {
        let periods = problem.periods.len();
        if self.rows.len() != problem.students.len() || self.rows.iter().any(|r| r.len() != periods) {
            return Err(Violation::Shape {
                students: problem.students.len(),
                periods,
            });
        }

        for (student, row) in self.rows.iter().enumerate() {
            if let Some(period) = row.iter().position(|slot| {
                problem
                    .internships
                    .get(slot.internship)
                    .is_none_or(|locations| !locations.contains(&slot.location))
            }) {
                return Err(Violation::UnknownSlot { student, period });
            }

            let spent = row.iter().map(|slot| slot.internship).counts();
            for (internship, &expected) in problem.allocation_rule.iter().enumerate() {
                let actual = spent.get(&internship).copied().unwrap_or(0) as u64;
                if actual != expected {
                    return Err(Violation::Quota {
                        student,
                        internship,
                        expected,
                        actual,
                    });
                }
            }
        }

        for period in 0..periods {
            let occupancy = self.rows.iter().map(|row| row[period].location).counts();
            for (location, count) in occupancy {
                let capacity = problem.capacity(location, period);
                if count as u64 > capacity {
                    return Err(Violation::Capacity {
                        period,
                        location,
                        capacity,
                        occupancy: count as u64,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Compresses each student's week-by-week placement into runs.
///
/// Single left-to-right pass per student: a period extends the previous run
/// when it keeps the same internship and location, otherwise it opens a new
/// run of length one.
pub fn extract_runs(assignment: &DenseAssignment) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for (student, row) in assignment.rows.iter().enumerate() {
        let mut current: Option<Run> = None;
        for (period, slot) in row.iter().enumerate() {
            match current.as_mut() {
                Some(run) if run.internship == slot.internship && run.location == slot.location => {
                    run.duration += 1;
                }
                _ => {
                    runs.extend(current.take());
                    current = Some(Run {
                        student,
                        internship: slot.internship,
                        location: slot.location,
                        start: period,
                        duration: 1,
                    });
                }
            }
        }
        runs.extend(current);
    }
    runs
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::normalize::tests::input;
    use crate::normalize::{Problem, pad_horizon};
    use std::collections::HashMap;

    /// Expands runs back into a dense assignment; `None` if they do not tile the horizon.
    pub(crate) fn expand_runs(runs: &[Run], students: usize, periods: usize) -> Option<DenseAssignment> {
        let mut cells: Vec<Vec<Option<Slot>>> = vec![vec![None; periods]; students];
        for run in runs {
            for period in run.start..run.start + run.duration {
                let cell = cells.get_mut(run.student)?.get_mut(period)?;
                if cell.is_some() {
                    return None;
                }
                *cell = Some(Slot {
                    internship: run.internship,
                    location: run.location,
                });
            }
        }
        let rows = cells
            .into_iter()
            .map(|row| row.into_iter().collect::<Option<Vec<_>>>())
            .collect::<Option<Vec<_>>>()?;
        Some(DenseAssignment { rows })
    }

    /// Checks total coverage, quotas and capacities directly on the runs.
    pub(crate) fn assert_runs_respect(problem: &Problem, runs: &[Run]) {
        let periods = problem.periods.len();
        let dense = expand_runs(runs, problem.students.len(), periods)
            .expect("runs must cover every period exactly once");
        assert_eq!(dense.verify(problem), Ok(()));

        let mut spent: HashMap<(StudentIndex, InternshipIndex), u64> = HashMap::new();
        let mut occupancy: HashMap<(PeriodIndex, LocationIndex), u64> = HashMap::new();
        for run in runs {
            *spent.entry((run.student, run.internship)).or_default() += run.duration as u64;
            for period in run.start..run.start + run.duration {
                *occupancy.entry((period, run.location)).or_default() += 1;
            }
        }
        for student in 0..problem.students.len() {
            for (internship, &weeks) in problem.allocation_rule.iter().enumerate() {
                assert_eq!(spent.get(&(student, internship)).copied().unwrap_or(0), weeks);
            }
        }
        for ((period, location), count) in occupancy {
            assert!(count <= problem.capacity(location, period));
        }
    }

    fn slot(internship: InternshipIndex, location: LocationIndex) -> Slot {
        Slot {
            internship,
            location,
        }
    }

    fn two_ward_problem() -> Problem {
        let raw = input(
            &["ada", "bo"],
            5,
            &[("north", vec![2; 5]), ("south", vec![2; 5]), ("clinic", vec![2; 5])],
            &[vec![0, 1], vec![2]],
            &[3, 1],
        );
        pad_horizon(Problem::from_input(&raw).unwrap())
    }

    #[test]
    fn test_runs_merge_consecutive_periods() {
        let assignment = DenseAssignment {
            rows: vec![
                vec![slot(0, 0), slot(0, 0), slot(1, 2), slot(1, 2), slot(0, 0)],
                vec![slot(1, 2); 5],
            ],
        };
        let runs = extract_runs(&assignment);
        let spans: Vec<_> = runs.iter().map(|r| (r.student, r.internship, r.start, r.duration)).collect();
        assert_eq!(spans, vec![(0, 0, 0, 2), (0, 1, 2, 2), (0, 0, 4, 1), (1, 1, 0, 5)]);
    }

    #[test]
    fn test_runs_do_not_cross_students() {
        let assignment = DenseAssignment {
            rows: vec![vec![slot(0, 0); 2], vec![slot(0, 0); 2]],
        };
        let runs = extract_runs(&assignment);
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.duration == 2 && r.start == 0));
    }

    #[test]
    fn test_location_change_opens_new_run() {
        let assignment = DenseAssignment {
            rows: vec![vec![slot(0, 0), slot(0, 1), slot(0, 1)]],
        };
        let runs = extract_runs(&assignment);
        assert_eq!(runs.len(), 2);
        assert_eq!((runs[1].location, runs[1].start, runs[1].duration), (1, 1, 2));
    }

    #[test]
    fn test_expanding_runs_reproduces_assignment() {
        let problem = two_ward_problem();
        let assignment = DenseAssignment {
            rows: vec![
                vec![slot(0, 0), slot(0, 1), slot(2, 3), slot(1, 2), slot(0, 1)],
                vec![slot(1, 2), slot(0, 0), slot(0, 0), slot(0, 0), slot(2, 3)],
            ],
        };
        assert_eq!(assignment.verify(&problem), Ok(()));

        let runs = extract_runs(&assignment);
        let rebuilt = expand_runs(&runs, 2, 5).unwrap();
        assert_eq!(rebuilt, assignment);
        assert_runs_respect(&problem, &runs);
    }

    #[test]
    fn test_verify_reports_quota_and_capacity() {
        let problem = two_ward_problem();
        let short = DenseAssignment {
            rows: vec![vec![slot(0, 0); 5], vec![slot(0, 0); 5]],
        };
        assert!(matches!(short.verify(&problem), Err(Violation::Quota { .. })));

        let raw = input(&["ada", "bo"], 1, &[("north", vec![1])], &[vec![0]], &[1]);
        let tight = Problem::from_input(&raw).unwrap();
        let crowded = DenseAssignment {
            rows: vec![vec![slot(0, 0)], vec![slot(0, 0)]],
        };
        assert_eq!(
            crowded.verify(&tight),
            Err(Violation::Capacity {
                period: 0,
                location: 0,
                capacity: 1,
                occupancy: 2
            })
        );

        let stray = DenseAssignment {
            rows: vec![vec![slot(0, 5)], vec![slot(0, 0)]],
        };
        assert_eq!(
            stray.verify(&tight),
            Err(Violation::UnknownSlot { student: 0, period: 0 })
        );
    }
}
