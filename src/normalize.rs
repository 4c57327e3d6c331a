use crate::data::{AllocationInput, InternshipIndex, LocationIndex};
use crate::error::ValidationError;
use log::{debug, trace};

/// Name of the synthetic location that absorbs periods no internship covers.
pub const UNASSIGNED_LOCATION: &str = "NOT_A_LOCATION";

/// A validated, job-scoped copy of the allocation input.
///
/// Capacity rows are padded with zeros to the period count. Nothing here
/// aliases the caller's input, so normalizing one job never leaks padding
/// into another.
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    pub students: Vec<String>,
    pub periods: Vec<String>,
    pub location_names: Vec<String>,
    /// capacity[location][period]
    pub capacities: Vec<Vec<u64>>,
    pub internships: Vec<Vec<LocationIndex>>,
    pub allocation_rule: Vec<u64>,
    /// preferences[student][internship], covering caller internships only
    pub preferences: Option<Vec<Vec<Vec<LocationIndex>>>>,
    /// Index of the synthetic padding internship, once added.
    pub padding: Option<InternshipIndex>,
}

impl Problem {
    /// Checks the structural prerequisites of `input` and copies it into a [`Problem`].
    pub fn from_input(input: &AllocationInput) -> Result<Self, ValidationError> {
        let period_count = input.periods.len();
        let location_count = input.locations.len();

        let raw_rule = input
            .allocation_rule
            .as_ref()
            .ok_or(ValidationError::MissingField("allocationRule"))?;
        if raw_rule.len() != input.internships.len() {
            return Err(ValidationError::length(
                "allocationRule",
                input.internships.len(),
                raw_rule.len(),
            ));
        }
        let allocation_rule = raw_rule
            .iter()
            .enumerate()
            .map(|(i, &weeks)| non_negative(format!("allocationRule[{i}]"), weeks))
            .collect::<Result<Vec<_>, _>>()?;

        let mut location_names = Vec::with_capacity(location_count);
        let mut capacities = Vec::with_capacity(location_count);
        for (l, location) in input.locations.iter().enumerate() {
            if location.name == UNASSIGNED_LOCATION {
                return Err(ValidationError::ReservedLocationName(location.name.clone()));
            }
            if location.capacities.len() > period_count {
                return Err(ValidationError::length(
                    format!("locations[{l}].capacities"),
                    period_count,
                    location.capacities.len(),
                ));
            }
            let mut row = location
                .capacities
                .iter()
                .enumerate()
                .map(|(p, &c)| non_negative(format!("locations[{l}].capacities[{p}]"), c))
                .collect::<Result<Vec<_>, _>>()?;
            // absent entries mean no capacity
            row.resize(period_count, 0);
            location_names.push(location.name.clone());
            capacities.push(row);
        }

        let mut internships = Vec::with_capacity(input.internships.len());
        for (i, internship) in input.internships.iter().enumerate() {
            if internship.locations.is_empty() {
                return Err(ValidationError::EmptyInternship(i));
            }
            if let Some(&location) = internship.locations.iter().find(|&&l| l >= location_count) {
                return Err(ValidationError::UnknownLocation {
                    field: format!("internships[{i}]"),
                    location,
                });
            }
            internships.push(internship.locations.clone());
        }

        let required: u64 = allocation_rule.iter().sum();
        if required > period_count as u64 {
            return Err(ValidationError::OverSubscribed {
                required,
                available: period_count,
            });
        }

        if let Some(preferences) = &input.preferences {
            if preferences.len() != input.students.len() {
                return Err(ValidationError::length(
                    "preferences",
                    input.students.len(),
                    preferences.len(),
                ));
            }
            for (s, per_internship) in preferences.iter().enumerate() {
                if per_internship.len() != internships.len() {
                    return Err(ValidationError::preference_row(
                        s,
                        internships.len(),
                        per_internship.len(),
                    ));
                }
                for (i, ranked) in per_internship.iter().enumerate() {
                    if let Some(&location) = ranked.iter().find(|&&l| l >= location_count) {
                        return Err(ValidationError::UnknownLocation {
                            field: format!("preferences[{s}][{i}]"),
                            location,
                        });
                    }
                }
            }
        }

        if let Some(budget) = input.time_budget_seconds {
            if !budget.is_finite() || budget <= 0.0 {
                return Err(ValidationError::InvalidTimeBudget(budget));
            }
        }

        trace!(
            "Validated input: {} students, {} periods, {} internships, {} locations",
            input.students.len(),
            period_count,
            internships.len(),
            location_count
        );

        Ok(Problem {
            students: input.students.clone(),
            periods: input.periods.clone(),
            location_names,
            capacities,
            internships,
            allocation_rule,
            preferences: input.preferences.clone(),
            padding: None,
        })
    }

    /// Internships the caller declared, excluding the padding internship.
    pub fn declared_internships(&self) -> usize {
        self.padding.unwrap_or(self.internships.len())
    }

    /// Capacity of `location` in `period`; zero when undeclared.
    pub fn capacity(&self, location: LocationIndex, period: usize) -> u64 {
        self.capacities
            .get(location)
            .and_then(|row| row.get(period))
            .copied()
            .unwrap_or(0)
    }
}

/// Pads the horizon so the allocation rule covers every period.
///
/// When the rule sums to fewer periods than exist, a synthetic location with
/// effectively unbounded capacity is appended together with an internship
/// holding only that location, and the deficit is appended to the rule.
/// A problem whose rule already covers the horizon is returned unchanged.
pub fn pad_horizon(mut problem: Problem) -> Problem {
    let period_count = problem.periods.len() as u64;
    let covered: u64 = problem.allocation_rule.iter().sum();
    let deficit = period_count.saturating_sub(covered);
    if deficit == 0 {
        return problem;
    }

    let unbounded = (problem.periods.len() as u64)
        .saturating_mul(problem.students.len() as u64)
        .max(1);
    problem.location_names.push(UNASSIGNED_LOCATION.to_string());
    problem.capacities.push(vec![unbounded; problem.periods.len()]);

    let padding_location = problem.location_names.len() - 1;
    problem.internships.push(vec![padding_location]);
    problem.allocation_rule.push(deficit);
    problem.padding = Some(problem.internships.len() - 1);

    debug!(
        "Padded horizon with {} unassigned periods (internship {})",
        deficit,
        problem.internships.len() - 1
    );
    problem
}

fn non_negative(field: String, value: i64) -> Result<u64, ValidationError> {
    u64::try_from(value).map_err(|_| ValidationError::Negative { field, value })
}
